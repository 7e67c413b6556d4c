//! Hex parsing for command-line arguments

use anyhow::{Result, anyhow, bail};

/// Parse a 16-bit USB id such as `0e77`, `0x0E77` or `0X0e77`
pub fn parse_id(input: &str) -> Result<u16> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if digits.is_empty() || digits.len() > 4 {
        bail!("Invalid USB id '{}', expected 1-4 hex digits", input);
    }

    u16::from_str_radix(digits, 16).map_err(|_| anyhow!("Invalid USB id '{}', not hex", input))
}

/// Parse frame bytes written as hex
///
/// Spaces, colons, and dashes between bytes are ignored, so `2900bce0`,
/// `29 00 bc e0` and `29:00:bc:e0` are the same frame.
pub fn parse_frame(input: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = input
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();

    if digits.is_empty() {
        bail!("Empty frame");
    }
    if digits.len() % 2 != 0 {
        bail!("Frame '{}' has an odd number of hex digits", input);
    }

    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16)
                .map_err(|_| anyhow!("Invalid hex byte '{}' in frame '{}'", byte, input))
        })
        .collect()
}
