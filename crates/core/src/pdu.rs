//! PDU codec seam
//!
//! PDU encoding and parsing is an external collaborator: the driver only
//! needs "text in, ordered parts out" and "raw report in, reference and
//! status out". Applications plug a real codec through [`PduCodec`]; the
//! driver itself never inspects TPDU bytes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModemError, Result};

/// Number format octet semantics for receiver and SMSC addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NumberType {
    /// E.164 with country code (type octet 0x91).
    International,
    /// National significant number (type octet 0x81).
    National,
}

/// Payload encoding of the SMS body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmsEncoding {
    /// GSM 03.38 7-bit default alphabet.
    Gsm7,
    /// UCS-2 for non-GSM alphabets.
    Ucs2,
}

/// What the driver hands the codec for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduRequest {
    /// SMSC override; `None` lets the modem use its stored SMSC.
    pub smsc: Option<String>,
    pub smsc_type: NumberType,
    /// Sanitized receiver digits (separators already stripped).
    pub receiver: String,
    pub receiver_type: NumberType,
    pub encoding: SmsEncoding,
    /// Request a delivery status report for each part.
    pub request_status: bool,
    pub text: String,
}

/// One encoded part: the length counted by `AT+CMGS=` plus the hex payload
/// written after the `>` prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PduPart {
    /// TPDU octet count, excluding the SMSC prefix.
    pub tpdu_length: usize,
    /// Hex string of SMSC prefix + TPDU, written verbatim to the port.
    pub smsc_tpdu: String,
}

/// TPDU type of an inbound PDU.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TpduType {
    Deliver,
    StatusReport,
    Submit,
    Other,
}

/// Parsed `SMS-STATUS-REPORT` fields the driver correlates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPdu {
    /// Message reference echoed from the original `+CMGS:` response.
    pub reference: u8,
    pub tpdu_type: TpduType,
    /// TP-Status octet; `0x00` means delivered.
    pub status: u8,
}

/// External PDU codec interface.
pub trait PduCodec: Send + Sync {
    /// Encode `request.text` into one or more ordered parts.
    fn generate(&self, request: &PduRequest) -> Result<Vec<PduPart>>;

    /// Parse a raw delivery-report PDU (hex string from a `+CDS:` payload).
    fn parse_delivery(&self, raw: &str) -> Result<DeliveryPdu>;
}

/// Codec stub for deployments that never send SMS (e.g. the monitor CLI).
pub struct NullCodec;

impl PduCodec for NullCodec {
    fn generate(&self, _request: &PduRequest) -> Result<Vec<PduPart>> {
        Err(ModemError::Pdu("no PDU codec configured".to_owned()))
    }

    fn parse_delivery(&self, _raw: &str) -> Result<DeliveryPdu> {
        Err(ModemError::Pdu("no PDU codec configured".to_owned()))
    }
}

/// Scripted codec for tests: returns fixed parts and maps raw report strings
/// to pre-parsed results.
pub struct MockCodec {
    parts: Vec<PduPart>,
    reports: HashMap<String, DeliveryPdu>,
}

impl MockCodec {
    pub fn new(parts: Vec<PduPart>) -> Self {
        Self {
            parts,
            reports: HashMap::new(),
        }
    }

    /// Register the parse result for a raw report payload.
    pub fn with_report(mut self, raw: &str, report: DeliveryPdu) -> Self {
        self.reports.insert(raw.to_owned(), report);
        self
    }
}

impl PduCodec for MockCodec {
    fn generate(&self, _request: &PduRequest) -> Result<Vec<PduPart>> {
        if self.parts.is_empty() {
            return Err(ModemError::Pdu("mock codec has no parts".to_owned()));
        }
        Ok(self.parts.clone())
    }

    fn parse_delivery(&self, raw: &str) -> Result<DeliveryPdu> {
        self.reports
            .get(raw)
            .copied()
            .ok_or_else(|| ModemError::Pdu(format!("unknown report payload: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_codec_refuses_everything() {
        assert!(NullCodec.generate(&request()).is_err());
        assert!(NullCodec.parse_delivery("0791").is_err());
    }

    #[test]
    fn test_mock_codec_round_trip() {
        let codec = MockCodec::new(vec![PduPart {
            tpdu_length: 23,
            smsc_tpdu: "0011000B".to_owned(),
        }])
        .with_report(
            "079100",
            DeliveryPdu {
                reference: 42,
                tpdu_type: TpduType::StatusReport,
                status: 0x00,
            },
        );

        let parts = codec.generate(&request()).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].tpdu_length, 23);

        let report = codec.parse_delivery("079100").unwrap();
        assert_eq!(report.reference, 42);
        assert!(codec.parse_delivery("unknown").is_err());
    }

    fn request() -> PduRequest {
        PduRequest {
            smsc: None,
            smsc_type: NumberType::International,
            receiver: "4915112345678".to_owned(),
            receiver_type: NumberType::International,
            encoding: SmsEncoding::Gsm7,
            request_status: true,
            text: "hello".to_owned(),
        }
    }
}
