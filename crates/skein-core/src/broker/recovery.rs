//! Recovery - 再起動後に未 ack の durable envelope を再送する
//!
//! 配送は at-least-once。再起動前に送ったが ack されていない envelope は、
//! 元の id と timestamp のまま再び送られる。

use std::collections::BTreeSet;

use super::{Broker, Durability};
use crate::domain::{BrokerError, StorageError};

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Envelopes handed to the transport again.
    pub resent: usize,
    /// Envelopes that could not be resent or decoded. They stay in the store.
    pub failed: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl Broker {
    /// durable ストアに残っている envelope を全部再送する
    ///
    /// 1 件の失敗はログに出して数え、処理は続ける。ストア自体が読めないときだけ中断する。
    #[tracing::instrument(name = "recovery", skip(self))]
    pub async fn recover_unacked_messages(&self) -> Result<RecoveryReport, BrokerError> {
        let _guard = self.lock.lock().await;

        let mut cursor = self
            .durable
            .unacked_iterator()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "unable to open durable store for recovery");
                BrokerError::Recovery(err)
            })?;

        let mut report = RecoveryReport::default();
        let mut touched = BTreeSet::new();
        let mut aborted = None;

        loop {
            let msg = match cursor.next_message() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(err @ StorageError::Serialization(_)) => {
                    tracing::error!(error = %err, "skipping undecodable envelope");
                    report.failed += 1;
                    continue;
                }
                Err(err) => {
                    tracing::error!(error = %err, "durable store read failed, recovery aborted");
                    aborted = Some(err);
                    break;
                }
            };

            touched.insert(msg.strand().to_string());
            match self.transport.send_message(&msg).await {
                Ok(()) => {
                    report.resent += 1;
                    self.metrics.message_sent(msg.strand());
                    tracing::debug!(strand = msg.strand(), msg_id = msg.id(), "message resent");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        strand = msg.strand(),
                        msg_id = msg.id(),
                        error = %err,
                        "failed to resend message"
                    );
                }
            }
        }
        cursor.close();

        for strand in &touched {
            self.report_depth(Durability::Durable, strand).await;
        }

        if let Some(err) = aborted {
            return Err(BrokerError::Recovery(err));
        }
        tracing::info!(resent = report.resent, failed = report.failed, "recovery complete");
        Ok(report)
    }
}
