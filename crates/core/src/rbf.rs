//! Bootstrap run-script payload
//!
//! The device loader launches programs through a small compiled script.
//! The script is kept as a hex template; the path of the executable to
//! launch is spliced in at a placeholder and the script's total length is
//! patched into its header.

use crate::error::{DeployError, Result};

/// Run-script template: prints a banner, runs the executable named at `XX`,
/// then prints a goodbye banner.
pub const RBF_TEMPLATE: &str = "
4c45474f580000006d000100000000001c000000000000000e000000821b038405018130813e8053
74617274696e672e2e2e0084006080XX00448581644886488405018130813e80427965210084000a
";

/// Token replaced by the hex-encoded executable path
pub const PLACEHOLDER: &str = "XX";

/// Offset of the 16-bit little-endian total length field
pub const LENGTH_OFFSET: usize = 4;

/// Build the bootstrap payload for `target_path` from `template`
///
/// Whitespace is stripped, the single placeholder is replaced with the
/// hex encoding of the path's raw bytes, the result is decoded, and the
/// final byte length is written at `LENGTH_OFFSET`.
///
/// # Errors
/// - `Template` if the placeholder is missing or appears more than once
/// - `Template` if the substituted text is not valid hex
/// - `Template` if the payload cannot hold or express its length field
pub fn build_bootstrap_payload(template: &str, target_path: &str) -> Result<Vec<u8>> {
    let stripped: String = template.chars().filter(|c| !c.is_whitespace()).collect();

    match stripped.matches(PLACEHOLDER).count() {
        1 => {}
        0 => {
            return Err(DeployError::Template(format!(
                "placeholder {:?} not found",
                PLACEHOLDER
            )))
        }
        n => {
            return Err(DeployError::Template(format!(
                "placeholder {:?} appears {} times",
                PLACEHOLDER, n
            )))
        }
    }

    let substituted = stripped.replacen(PLACEHOLDER, &to_hex(target_path.as_bytes()), 1);
    let mut payload = from_hex(&substituted)?;

    if payload.len() < LENGTH_OFFSET + 2 {
        return Err(DeployError::Template(format!(
            "payload of {} bytes has no room for the length field",
            payload.len()
        )));
    }
    let len = u16::try_from(payload.len()).map_err(|_| {
        DeployError::Template(format!("payload of {} bytes exceeds 16-bit length", payload.len()))
    })?;
    payload[LENGTH_OFFSET..LENGTH_OFFSET + 2].copy_from_slice(&len.to_le_bytes());

    tracing::debug!("Built bootstrap payload for {} ({} bytes)", target_path, len);
    Ok(payload)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(DeployError::Template(format!(
            "odd number of hex digits ({})",
            hex.len()
        )));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| DeployError::Template(format!("invalid hex at offset {}", i)))
        })
        .collect()
}
