//! Expect-style driver for interactive programs.

use std::time::Duration;

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

/// Stands in for secret responses echoed back by a terminal.
pub const REDACTED: &str = "<redacted>";

/// Default time to wait for each prompt.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
struct Exchange {
    pattern: Regex,
    response: String,
    secret: bool,
}

/// An ordered list of `(prompt pattern, response)` pairs.
///
/// Each response is written followed by a newline once its pattern matches
/// the output received since the previous match.
#[derive(Clone, Debug)]
pub struct ExpectScript {
    exchanges: Vec<Exchange>,
    prompt_timeout: Duration,
}

impl Default for ExpectScript {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_TIMEOUT)
    }
}

impl ExpectScript {
    /// Creates an empty script.
    #[must_use]
    pub const fn new(prompt_timeout: Duration) -> Self {
        Self {
            exchanges: Vec::new(),
            prompt_timeout,
        }
    }

    /// Appends an exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn expect(self, pattern: &str, response: impl Into<String>) -> Result<Self> {
        self.push(pattern, response.into(), false)
    }

    /// Appends an exchange whose response never shows up in the returned
    /// transcript or in errors, even when the terminal echoes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn expect_secret(self, pattern: &str, response: impl Into<String>) -> Result<Self> {
        self.push(pattern, response.into(), true)
    }

    fn push(mut self, pattern: &str, response: String, secret: bool) -> Result<Self> {
        self.exchanges.push(Exchange {
            pattern: Regex::new(pattern)?,
            response,
            secret,
        });
        Ok(self)
    }

    fn redact(&self, bytes: &[u8]) -> String {
        self.exchanges
            .iter()
            .filter(|e| e.secret && !e.response.is_empty())
            .fold(String::from_utf8_lossy(bytes).into_owned(), |text, e| {
                text.replace(&e.response, REDACTED)
            })
    }

    /// Number of exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Returns true if the script has no exchanges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Timeout applied to each prompt.
    #[must_use]
    pub const fn prompt_timeout(&self) -> Duration {
        self.prompt_timeout
    }

    /// Runs the script against a program's output and input streams.
    ///
    /// Returns everything read from `output`, with secret responses
    /// replaced by [`REDACTED`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedPrompt`] if the program stalls on output
    /// the current pattern does not match, [`Error::ExpectTimeout`] if it
    /// stalls without printing anything, and [`Error::PromptClosed`] if the
    /// stream ends first.
    pub async fn drive<R, W>(&self, output: &mut R, input: &mut W) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut pending: Vec<u8> = Vec::new();
        let mut transcript: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];

        for exchange in &self.exchanges {
            loop {
                if let Some(found) = exchange.pattern.find(&pending) {
                    debug!("matched prompt `{}`", exchange.pattern);
                    pending.drain(..found.end());
                    input
                        .write_all(format!("{}\n", exchange.response).as_bytes())
                        .await
                        .map_err(|e| Error::Io("failed to answer prompt", e))?;
                    input
                        .flush()
                        .await
                        .map_err(|e| Error::Io("failed to answer prompt", e))?;
                    break;
                }

                match timeout(self.prompt_timeout, output.read(&mut chunk)).await {
                    Err(_) => {
                        let seen = self.redact(&pending).trim().to_string();
                        return Err(if seen.is_empty() {
                            Error::ExpectTimeout {
                                pattern: exchange.pattern.to_string(),
                            }
                        } else {
                            Error::UnexpectedPrompt { output: seen }
                        });
                    }
                    Ok(Err(e)) => return Err(Error::Io("failed to read program output", e)),
                    Ok(Ok(0)) => {
                        return Err(Error::PromptClosed {
                            pattern: exchange.pattern.to_string(),
                            output: self.redact(&pending).trim().to_string(),
                        });
                    }
                    Ok(Ok(n)) => {
                        pending.extend_from_slice(&chunk[..n]);
                        transcript.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }

        Ok(self.redact(&transcript))
    }
}
