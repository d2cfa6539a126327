//! Time-based one-time passwords (RFC 6238)

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::{Hmac, Mac};
use lockbox_core::Config;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use thiserror::Error;
use url::Url;

const DEFAULT_DIGITS: u32 = 6;
const DEFAULT_PERIOD: u64 = 30;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("invalid base32 TOTP secret")]
    InvalidBase32Secret,
    #[error("invalid otpauth URI: {0}")]
    InvalidOtpAuthUri(String),
    #[error("unsupported otpauth URI type; expected `totp`")]
    UnsupportedOtpAuthType,
    #[error("invalid TOTP config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        })
    }
}

/// A parsed otpauth TOTP definition
#[derive(Clone, PartialEq, Eq)]
pub struct Totp {
    /// The `secret` parameter as written
    pub secret: String,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
    pub url: String,
    seed: Vec<u8>,
}

impl fmt::Debug for Totp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Totp")
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl Totp {
    /// Parse a stored value, promoting bare seeds through `totp.otp_format`
    pub fn from_config(config: &Config, value: &str) -> Result<Self, TotpError> {
        Self::parse(&config.otp_url(value))
    }

    /// Parse a full `otpauth://totp/...` URL
    pub fn parse(uri: &str) -> Result<Self, TotpError> {
        let parsed =
            Url::parse(uri).map_err(|error| TotpError::InvalidOtpAuthUri(error.to_string()))?;
        if parsed.scheme() != "otpauth" {
            return Err(TotpError::InvalidOtpAuthUri(
                "scheme must be `otpauth`".to_owned(),
            ));
        }
        if parsed.host_str() != Some("totp") {
            return Err(TotpError::UnsupportedOtpAuthType);
        }

        let mut secret: Option<String> = None;
        let mut algorithm = Algorithm::Sha1;
        let mut digits = DEFAULT_DIGITS;
        let mut period = DEFAULT_PERIOD;

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "secret" => secret = Some(value.into_owned()),
                "algorithm" => algorithm = parse_algorithm(value.as_ref())?,
                "digits" => {
                    digits = value.parse::<u32>().map_err(|_| {
                        TotpError::InvalidOtpAuthUri("digits must be an integer".to_owned())
                    })?;
                }
                "period" => {
                    period = value.parse::<u64>().map_err(|_| {
                        TotpError::InvalidOtpAuthUri("period must be an integer".to_owned())
                    })?;
                }
                _ => {}
            }
        }

        let secret = secret.ok_or_else(|| {
            TotpError::InvalidOtpAuthUri("missing `secret` query parameter".to_owned())
        })?;
        if !(6..=8).contains(&digits) {
            return Err(TotpError::InvalidConfig(format!(
                "digits must be between 6 and 8, got {}",
                digits
            )));
        }
        if period == 0 {
            return Err(TotpError::InvalidConfig(
                "period must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            seed: decode_base32_secret(&secret)?,
            secret,
            algorithm,
            digits,
            period,
            url: uri.to_string(),
        })
    }

    /// Code for a given unix time
    pub fn generate(&self, unix_seconds: u64) -> Result<String, TotpError> {
        let counter = unix_seconds / self.period;
        let counter_bytes = counter.to_be_bytes();
        let hmac = match self.algorithm {
            Algorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(&self.seed, &counter_bytes)?,
            Algorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(&self.seed, &counter_bytes)?,
            Algorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(&self.seed, &counter_bytes)?,
        };

        let value = dynamic_truncate(&hmac)?;
        let code = value % 10_u32.pow(self.digits);
        Ok(format!("{code:0width$}", width = self.digits as usize))
    }

    /// Code for the current time
    pub fn now(&self) -> Result<String, TotpError> {
        self.generate(unix_seconds_now())
    }
}

pub fn decode_base32_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|character| !character.is_whitespace() && *character != '-')
        .map(|character| character.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Err(TotpError::InvalidBase32Secret);
    }

    let decoded = BASE32
        .decode(normalized.as_bytes())
        .or_else(|_| BASE32_NOPAD.decode(normalized.as_bytes()))
        .map_err(|_| TotpError::InvalidBase32Secret)?;
    if decoded.is_empty() {
        return Err(TotpError::InvalidBase32Secret);
    }

    Ok(decoded)
}

fn parse_algorithm(value: &str) -> Result<Algorithm, TotpError> {
    match value.to_ascii_uppercase().as_str() {
        "SHA1" => Ok(Algorithm::Sha1),
        "SHA256" => Ok(Algorithm::Sha256),
        "SHA512" => Ok(Algorithm::Sha512),
        _ => Err(TotpError::InvalidOtpAuthUri(format!(
            "unsupported algorithm `{value}`"
        ))),
    }
}

fn hmac_digest<M: Mac + hmac::digest::KeyInit>(
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, TotpError> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .map_err(|_| TotpError::InvalidConfig("invalid seed length".to_owned()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn dynamic_truncate(hmac: &[u8]) -> Result<u32, TotpError> {
    let offset = usize::from(
        *hmac
            .last()
            .ok_or_else(|| TotpError::InvalidConfig("empty HMAC output".to_owned()))?
            & 0x0f,
    );
    if hmac.len() < offset + 4 {
        return Err(TotpError::InvalidConfig(
            "HMAC output too short for dynamic truncation".to_owned(),
        ));
    }

    let b0 = u32::from(hmac[offset] & 0x7f);
    let b1 = u32::from(hmac[offset + 1]);
    let b2 = u32::from(hmac[offset + 2]);
    let b3 = u32::from(hmac[offset + 3]);
    Ok((b0 << 24) | (b1 << 16) | (b2 << 8) | b3)
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
