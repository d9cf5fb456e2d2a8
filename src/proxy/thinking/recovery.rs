//! Single-retry recovery from rejected thinking signatures.
//!
//! ```text
//! payload ──► pre-sanitize ──► attempt 1 ──► ok / other error ──► return
//!                                  │
//!                          400 signature error
//!                                  │
//!               coordinate + signature? ─yes─► blacklist, selective strip
//!                                  │no
//!                             full strip
//!                                  │
//!                              attempt 2 ──► return (never a third)
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::blacklist::{short, SignatureBlacklist};
use super::classifier::{extract_coordinate, is_signature_error};
use super::context::{RecoveryOutcome, RecoveryReport};
use super::error::RecoveryError;
use super::sanitize::{signature_at, strip_all_thinking, strip_blacklisted_thinking};
use super::session::derive_session_id;
use super::traits::{Transport, UpstreamResponse};

/// Final response of an orchestrated request.
#[derive(Debug)]
pub struct Recovered {
    pub response: UpstreamResponse,
    pub report: RecoveryReport,
    /// Payload of the attempt that produced `response`.
    pub payload: Bytes,
}

/// Orchestrates at most two attempts per request against a shared
/// [`SignatureBlacklist`].
#[derive(Clone, Default)]
pub struct SignatureRecovery {
    blacklist: SignatureBlacklist,
}

impl SignatureRecovery {
    pub fn new(blacklist: SignatureBlacklist) -> Self {
        Self { blacklist }
    }

    pub fn blacklist(&self) -> &SignatureBlacklist {
        &self.blacklist
    }

    /// Send `payload` through `transport`, retrying once if the upstream
    /// rejects a thinking signature.
    ///
    /// Any response other than a buffered, classified signature error is
    /// returned untouched, as is the retry's response. Cancelling `cancel`
    /// aborts the in-flight attempt and suppresses the retry.
    pub async fn execute<T>(
        &self,
        transport: &T,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Recovered, RecoveryError<T::Error>>
    where
        T: Transport + ?Sized,
    {
        let Ok(mut body) = serde_json::from_slice::<Value>(&payload) else {
            // Nothing to sanitize in an opaque payload.
            let response = send_cancellable(transport, payload.clone(), cancel).await?;
            return Ok(Recovered {
                response,
                report: RecoveryReport::new(String::new(), false),
                payload,
            });
        };

        let session_id = derive_session_id(&body);
        let pre = strip_blacklisted_thinking(&mut body, &session_id, &self.blacklist);
        let sent = if pre.changed {
            encode(&body, &payload)
        } else {
            payload
        };
        let mut report = RecoveryReport::new(session_id, pre.changed);

        let response = send_cancellable(transport, sent.clone(), cancel).await?;
        let Some(error_body) = signature_error_body(&response) else {
            return Ok(Recovered {
                response,
                report,
                payload: sent,
            });
        };
        drop(response);

        self.repair(&mut body, &error_body, &mut report);

        if cancel.is_cancelled() {
            return Err(RecoveryError::Cancelled);
        }

        tracing::info!(
            outcome = %report.outcome,
            signature_recorded = report.signature_recorded,
            "Thinking signature rejected, retrying once"
        );

        let retry = encode(&body, &sent);
        let response = send_cancellable(transport, retry.clone(), cancel).await?;

        if !response.is_success() {
            tracing::warn!(
                status = %response.status,
                outcome = %report.outcome,
                "Retry after thinking signature rejection failed"
            );
        }

        Ok(Recovered {
            response,
            report,
            payload: retry,
        })
    }

    /// Rewrite `body` (the payload actually sent) for the retry.
    fn repair(&self, body: &mut Value, error_body: &[u8], report: &mut RecoveryReport) {
        let coordinate = extract_coordinate(error_body);
        let signature = coordinate
            .and_then(|c| signature_at(body, c))
            .filter(|_| !report.session_id.is_empty())
            .map(str::to_owned);

        if let Some(signature) = signature {
            self.blacklist.record(&report.session_id, &signature);
            report.signature_recorded = true;

            if strip_blacklisted_thinking(body, &report.session_id, &self.blacklist).changed {
                report.outcome = RecoveryOutcome::RetriedSelective;
                return;
            }
            tracing::debug!(
                signature = %short(&signature),
                "Rejected block is not a thinking block, falling back to full strip"
            );
        } else {
            tracing::debug!(
                ?coordinate,
                tracked = !report.session_id.is_empty(),
                "No usable rejected signature, falling back to full strip"
            );
        }

        strip_all_thinking(body);
        report.outcome = RecoveryOutcome::RetriedFullStrip;
    }
}

/// Wraps a [`Transport`] so every `send` goes through [`SignatureRecovery`].
///
/// For call sites that only see a transport and cannot use
/// [`SignatureRecovery::execute`] directly.
pub struct RecoveringTransport<T> {
    inner: T,
    recovery: SignatureRecovery,
    cancel: CancellationToken,
}

impl<T: Transport> RecoveringTransport<T> {
    pub fn new(inner: T, blacklist: SignatureBlacklist) -> Self {
        Self {
            inner,
            recovery: SignatureRecovery::new(blacklist),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight attempts when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RecoveringTransport<T> {
    type Error = RecoveryError<T::Error>;

    async fn send(&self, payload: Bytes) -> Result<UpstreamResponse, Self::Error> {
        self.recovery
            .execute(&self.inner, payload, &self.cancel)
            .await
            .map(|recovered| recovered.response)
    }
}

async fn send_cancellable<T>(
    transport: &T,
    payload: Bytes,
    cancel: &CancellationToken,
) -> Result<UpstreamResponse, RecoveryError<T::Error>>
where
    T: Transport + ?Sized,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RecoveryError::Cancelled),
        result = transport.send(payload) => result.map_err(RecoveryError::Transport),
    }
}

fn signature_error_body(response: &UpstreamResponse) -> Option<Bytes> {
    let body = response.buffered_body()?;
    is_signature_error(response.status, body).then(|| body.clone())
}

fn encode(body: &Value, fallback: &Bytes) -> Bytes {
    match serde_json::to_vec(body) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to re-encode sanitized payload");
            fallback.clone()
        }
    }
}
