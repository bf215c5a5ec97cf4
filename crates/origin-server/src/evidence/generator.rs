//! Evidence artifact rendering.
//!
//! All formats derive from one canonical evidence document: the JSON
//! artifact is its canonical encoding, HTML and PDF render the same
//! content for human consumption. Rendering is deterministic; a rendering
//! failure is a terminal outcome for the pack, never a retry.

use serde_json::{json, Value};
use thiserror::Error;

use origin_core::canonical::{canonicalize, CanonicalError};

use crate::storage::models::{CertificateRow, LedgerEventRow, Upload};

/// Deterministic rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The evidence document could not be canonically encoded.
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),

    /// The requested format is not supported.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Formats a pack can contain.
pub const SUPPORTED_FORMATS: &[&str] = &["json", "html", "pdf"];

/// Builds the canonical evidence document for a certificate.
#[must_use]
pub fn build_document(
    certificate: &CertificateRow,
    upload: &Upload,
    ledger_event: &LedgerEventRow,
) -> Value {
    json!({
        "evidence_version": "1.0",
        "certificate": {
            "certificate_id": certificate.certificate_id,
            "policy_version": certificate.policy_version,
            "inputs_hash": certificate.inputs_hash,
            "outputs_hash": certificate.outputs_hash,
            "ledger_hash": certificate.ledger_hash,
            "key_id": certificate.key_id,
            "alg": certificate.alg,
            "signature": certificate.signature,
            "signature_encoding": certificate.signature_encoding,
            "signed_payload": certificate.signed_payload,
            "issued_at": certificate.issued_at.to_rfc3339(),
        },
        "upload": {
            "external_id": upload.external_id,
            "pvid": upload.pvid,
            "decision": upload.decision,
            "received_at": upload.received_at.to_rfc3339(),
            "decision_inputs": upload.decision_inputs_json,
        },
        "ledger": {
            "tenant_sequence": ledger_event.tenant_sequence,
            "event_hash": ledger_event.event_hash,
            "prev_hash": ledger_event.prev_hash,
            "event_timestamp": ledger_event.event_timestamp.to_rfc3339(),
        },
    })
}

/// Renders one format of the document.
///
/// # Errors
///
/// Returns [`RenderError`] for unsupported formats or encoding failures.
pub fn render(document: &Value, format: &str) -> Result<(Vec<u8>, &'static str), RenderError> {
    match format {
        "json" => Ok((canonicalize(document)?.into_bytes(), "application/json")),
        "html" => Ok((render_html(document).into_bytes(), "text/html; charset=utf-8")),
        "pdf" => {
            let canonical = canonicalize(document)?;
            Ok((render_pdf(&canonical), "application/pdf"))
        }
        other => Err(RenderError::UnsupportedFormat(other.to_string())),
    }
}

fn render_html(document: &Value) -> String {
    let certificate_id = document
        .pointer("/certificate/certificate_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let decision = document
        .pointer("/upload/decision")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let pretty = serde_json::to_string_pretty(document).unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Evidence Pack {certificate_id}</title>\n</head>\n<body>\n\
         <h1>Decision Evidence</h1>\n\
         <p>Certificate <code>{certificate_id}</code> &mdash; decision <strong>{}</strong></p>\n\
         <pre>{}</pre>\n</body>\n</html>\n",
        html_escape(decision),
        html_escape(&pretty),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal single-page PDF wrapping the canonical document text. This
/// satisfies the artifact contract; a production renderer can be swapped
/// in behind [`render`] without touching the pipeline.
fn render_pdf(text: &str) -> Vec<u8> {
    // One text line per ~90 characters, Courier 8pt.
    let mut content = String::from("BT /F1 8 Tf 36 756 Td 10 TL\n");
    for chunk in chunks(text, 90).into_iter().take(70) {
        let escaped = chunk
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        content.push_str(&format!("({escaped}) Tj T*\n"));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_string(),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }

    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in &offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    ));

    out.into_bytes()
}

fn chunks(s: &str, size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        current.push(c);
        if current.len() >= size {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn fixtures() -> (CertificateRow, Upload, LedgerEventRow) {
        let now = Utc::now();
        let certificate = CertificateRow {
            id: 1,
            certificate_id: "cert-uuid".to_string(),
            tenant_id: 1,
            upload_id: 1,
            policy_version: "profile-v1".to_string(),
            inputs_hash: "aa".repeat(32),
            outputs_hash: "bb".repeat(32),
            ledger_hash: "cc".repeat(32),
            key_id: "origin-abc".to_string(),
            alg: "PS256".to_string(),
            signature: "c2ln".to_string(),
            signature_encoding: "base64url".to_string(),
            signed_payload: "{}".to_string(),
            issued_at: now,
        };
        let upload = Upload {
            id: 1,
            tenant_id: 1,
            external_id: "up-1".to_string(),
            account_id: 1,
            device_hash: None,
            pvid: "PVID-ABC".to_string(),
            decision: Some("ALLOW".to_string()),
            metadata_json: None,
            decision_inputs_json: Some(serde_json::json!({"features": {}})),
            certificate_id: Some(1),
            ledger_event_id: Some(1),
            received_at: now,
        };
        let ledger_event = LedgerEventRow {
            id: 1,
            tenant_id: 1,
            tenant_sequence: 1,
            event_timestamp: now,
            canonical_event_json: "{}".to_string(),
            event_hash: "dd".repeat(32),
            prev_hash: "0".repeat(64),
        };
        (certificate, upload, ledger_event)
    }

    #[test]
    fn test_json_artifact_is_canonical() {
        let (certificate, upload, ledger_event) = fixtures();
        let document = build_document(&certificate, &upload, &ledger_event);
        let (bytes, content_type) = render(&document, "json").unwrap();
        assert_eq!(content_type, "application/json");
        assert!(origin_core::canonical::is_canonical(
            std::str::from_utf8(&bytes).unwrap()
        ));
    }

    #[test]
    fn test_json_rendering_deterministic() {
        let (certificate, upload, ledger_event) = fixtures();
        let document = build_document(&certificate, &upload, &ledger_event);
        let (a, _) = render(&document, "json").unwrap();
        let (b, _) = render(&document, "json").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_html_contains_certificate_and_decision() {
        let (certificate, upload, ledger_event) = fixtures();
        let document = build_document(&certificate, &upload, &ledger_event);
        let (bytes, content_type) = render(&document, "html").unwrap();
        let html = String::from_utf8(bytes).unwrap();
        assert_eq!(content_type, "text/html; charset=utf-8");
        assert!(html.contains("cert-uuid"));
        assert!(html.contains("ALLOW"));
    }

    #[test]
    fn test_pdf_has_header_and_trailer() {
        let (certificate, upload, ledger_event) = fixtures();
        let document = build_document(&certificate, &upload, &ledger_event);
        let (bytes, content_type) = render(&document, "pdf").unwrap();
        assert_eq!(content_type, "application/pdf");
        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let (certificate, upload, ledger_event) = fixtures();
        let document = build_document(&certificate, &upload, &ledger_event);
        assert!(matches!(
            render(&document, "docx"),
            Err(RenderError::UnsupportedFormat(_))
        ));
    }
}
