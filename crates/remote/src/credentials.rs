//! Cloud credential file handling.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::expect::ExpectScript;

const ACCESS_KEY_FIELD: &str = "AWSAccessKeyId";
const SECRET_KEY_FIELD: &str = "AWSSecretKey";

/// Access key pair read from a root key file.
///
/// The file holds one `Name=value` pair per line:
///
/// ```text
/// AWSAccessKeyId=AKIDEXAMPLE
/// AWSSecretKey=wJalrXUtnFEMI
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct CloudCredentials {
    access_key_id: String,
    secret_access_key: String,
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl CloudCredentials {
    /// Parses the contents of a root key file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if either key is missing or empty.
    pub fn parse(text: &str) -> Result<Self> {
        let mut access_key_id = None;
        let mut secret_access_key = None;

        for line in text.lines() {
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match name.trim() {
                ACCESS_KEY_FIELD => access_key_id = Some(value),
                SECRET_KEY_FIELD => secret_access_key = Some(value),
                _ => {}
            }
        }

        match (access_key_id, secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok(Self {
                access_key_id: id,
                secret_access_key: secret,
            }),
            _ => Err(Error::Credentials(format!(
                "expected non-empty {ACCESS_KEY_FIELD} and {SECRET_KEY_FIELD}"
            ))),
        }
    }

    /// Reads and parses a root key file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, or
    /// [`Error::Credentials`] if it is malformed.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io("failed to read credential file", e))?;

        Self::parse(&text)
    }

    /// The access key id.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret access key.
    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Script answering the cloud CLI's `configure` prompts.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in patterns; the result mirrors
    /// [`ExpectScript::expect`].
    pub fn configure_script(
        &self,
        region: &str,
        output_format: &str,
        prompt_timeout: Duration,
    ) -> Result<ExpectScript> {
        ExpectScript::new(prompt_timeout)
            .expect(r"Access Key ID[^:]*:", self.access_key_id.clone())?
            .expect_secret(r"Secret Access Key[^:]*:", self.secret_access_key.clone())?
            .expect(r"region name[^:]*:", region)?
            .expect(r"output format[^:]*:", output_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root_key_file() {
        let creds =
            CloudCredentials::parse("AWSAccessKeyId=AKIDEXAMPLE\r\nAWSSecretKey=abc/def=\r\n")
                .unwrap();

        assert_eq!(creds.access_key_id(), "AKIDEXAMPLE");
        assert_eq!(creds.secret_access_key(), "abc/def=");
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let err = CloudCredentials::parse("AWSAccessKeyId=AKIDEXAMPLE\n").unwrap_err();

        assert!(matches!(err, Error::Credentials(_)));
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds =
            CloudCredentials::parse("AWSAccessKeyId=AKIDEXAMPLE\nAWSSecretKey=hunter2\n").unwrap();

        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rootkey.csv");
        tokio::fs::write(&path, "AWSAccessKeyId=AKID\nAWSSecretKey=SECRET\n")
            .await
            .unwrap();

        let creds = CloudCredentials::from_file(&path).await.unwrap();

        assert_eq!(creds.access_key_id(), "AKID");
        assert_eq!(creds.secret_access_key(), "SECRET");
    }

    #[test]
    fn test_configure_script_has_four_prompts() {
        let creds =
            CloudCredentials::parse("AWSAccessKeyId=AKID\nAWSSecretKey=SECRET\n").unwrap();

        let script = creds
            .configure_script("us-east-1", "", Duration::from_secs(10))
            .unwrap();

        assert_eq!(script.len(), 4);
        assert_eq!(script.prompt_timeout(), Duration::from_secs(10));
    }
}
