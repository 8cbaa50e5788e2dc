//! Digit-run heuristics for mechanical gas and electricity dials
//!
//! Meter faces carry a serial number next to the dial row, so the raw text
//! usually holds several digit groups. In order of preference:
//! 1. `int<sep>ddd` where the integer part is at most [`MAX_INTEGER_PART`];
//!    the last match wins (the dial row is printed below the serial)
//! 2. an 8 to 9 digit run read as `int.ddd`, same bound, last run wins
//! 3. the last 4 to 8 digit group, or failing that the last digit run

use async_trait::async_trait;
use lazy_static::lazy_static;
use meterbill_common::{OcrCandidate, Result};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use super::{MeterValueExtractor, TextRecognizer};

/// Integer parts above this are treated as serial numbers
pub const MAX_INTEGER_PART: u64 = 200_000;

lazy_static! {
    static ref SPLIT_DIAL: Regex = Regex::new(r"(\d{4,6})\D+(\d{3})").expect("valid regex");
    static ref LONG_RUN: Regex = Regex::new(r"\d{8,9}").expect("valid regex");
    static ref DIGIT_GROUP: Regex = Regex::new(r"\d{4,8}").expect("valid regex");
    static ref ANY_DIGITS: Regex = Regex::new(r"\d+").expect("valid regex");
}

/// `whole.decimals` with leading zeros of the integer part dropped, or
/// `None` when the integer part looks like a serial number
fn dial_value(whole: &str, decimals: &str) -> Option<Decimal> {
    let whole: u64 = whole.parse().ok()?;
    if whole > MAX_INTEGER_PART {
        return None;
    }
    Decimal::from_str(&format!("{}.{}", whole, decimals)).ok()
}

/// Best-guess meter value from recognized text
pub fn parse_meter_value(text: &str) -> Option<Decimal> {
    let split = SPLIT_DIAL
        .captures_iter(text)
        .filter_map(|caps| dial_value(&caps[1], &caps[2]))
        .last();
    if split.is_some() {
        return split;
    }

    let long_run = LONG_RUN
        .find_iter(text)
        .filter_map(|m| {
            let run = m.as_str();
            let (whole, decimals) = run.split_at(run.len() - 3);
            dial_value(whole, decimals)
        })
        .last();
    if long_run.is_some() {
        return long_run;
    }

    DIGIT_GROUP
        .find_iter(text)
        .last()
        .or_else(|| ANY_DIGITS.find_iter(text).last())
        .and_then(|m| Decimal::from_str(m.as_str()).ok())
        .map(|d| d.normalize())
}

/// Runs a [`TextRecognizer`] and applies [`parse_meter_value`].
/// Confidence is passed through from the recognizer unchanged.
pub struct HeuristicExtractor<R> {
    recognizer: R,
}

impl<R: TextRecognizer> HeuristicExtractor<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer }
    }
}

#[async_trait]
impl<R: TextRecognizer> MeterValueExtractor for HeuristicExtractor<R> {
    async fn extract(&self, image: &[u8]) -> Result<OcrCandidate> {
        let recognized = self.recognizer.recognize(image).await?;
        let value = parse_meter_value(&recognized.text);
        debug!(
            chars = recognized.text.len(),
            value = ?value,
            confidence = ?recognized.confidence,
            "Extracted meter candidate"
        );
        Ok(OcrCandidate::new(value, recognized.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{MockTextRecognizer, RecognizedText};
    use meterbill_common::{DependencyError, MeterBillError};
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_dial_row() {
        assert_eq!(parse_meter_value("00190 981\nSN 709223"), Some(dec!(190.981)));
    }

    #[test]
    fn test_serial_number_is_skipped() {
        assert_eq!(
            parse_meter_value("709223-445 text 01234 567"),
            Some(dec!(1234.567))
        );
    }

    #[test]
    fn test_last_split_match_wins() {
        assert_eq!(
            parse_meter_value("0100 111 then 0200 222"),
            Some(dec!(200.222))
        );
    }

    #[test]
    fn test_long_run() {
        assert_eq!(parse_meter_value("reading 00190981"), Some(dec!(190.981)));
        assert_eq!(parse_meter_value("x 900000000"), Some(dec!(90000000)));
    }

    #[test]
    fn test_last_digit_group_fallback() {
        assert_eq!(parse_meter_value("meter 12 345678"), Some(dec!(345678)));
        assert_eq!(parse_meter_value("dial 7 42"), Some(dec!(42)));
    }

    #[test]
    fn test_no_digits() {
        assert_eq!(parse_meter_value("no numbers here"), None);
        assert_eq!(parse_meter_value(""), None);
    }

    #[tokio::test]
    async fn test_extractor_passes_confidence_through() {
        let mut recognizer = MockTextRecognizer::new();
        recognizer.expect_recognize().returning(|_| {
            Ok(RecognizedText {
                text: "00190 981".into(),
                confidence: Some(87.5),
            })
        });

        let candidate = HeuristicExtractor::new(recognizer)
            .extract(b"jpeg")
            .await
            .unwrap();
        assert_eq!(candidate.value, Some(dec!(190.981)));
        assert_eq!(candidate.confidence, Some(87.5));
    }

    #[tokio::test]
    async fn test_recognizer_failure_propagates() {
        let mut recognizer = MockTextRecognizer::new();
        recognizer.expect_recognize().returning(|_| {
            Err(DependencyError::Unavailable("ocr offline".into()).into())
        });

        let err = HeuristicExtractor::new(recognizer)
            .extract(b"jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, MeterBillError::Dependency(_)));
    }
}
