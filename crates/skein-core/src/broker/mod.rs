//! Broker - strand 登録、durability によるルーティング、send/receive/acknowledge
//!
//! Broker は volatile ストア・durable ストア・トランスポートを 1 つずつ持つ。
//! strand をどちらのストアが持つかは登録時に `StrandConf::durable` で決まり、
//! 呼び出しのたびにストアへ問い合わせて（durable が先）見つける。
//! キャッシュしないので、裏でストアが reset / reload されてもそのまま見える。
//!
//! # プロトコル
//! 1. `strand_add` が選んだストアに strand を登録
//! 2. `send` が envelope を永続化してからトランスポートに渡す
//! 3. `receive` がトランスポートから次の envelope を取る（ストアには触れない）
//! 4. `acknowledge` が永続化済みのコピーを消す
//! 5. 再起動後、`recover_unacked_messages` が durable な envelope を全部再送
//!
//! # ロック
//! エンジン全体で 1 つの mutex が全呼び出しを直列化する。
//! ただし `receive` はトランスポートを待つ前に手放す（待機中の consumer が producer を止めないように）。

mod builder;
mod recovery;

pub use self::builder::BrokerBuilder;
pub use self::recovery::RecoveryReport;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{BrokerError, Msg, StrandConf, validate_strand_id};
use crate::ports::{IdGenerator, MetricsSink, Storage, Transport};

/// strand を持っているのはどちらのストアか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    Volatile,
}

impl Durability {
    fn of(conf: StrandConf) -> Self {
        if conf.durable {
            Self::Durable
        } else {
            Self::Volatile
        }
    }
}

pub struct Broker {
    volatile: Arc<dyn Storage>,
    durable: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsSink>,
    id_generator: Arc<dyn IdGenerator>,
    lock: Mutex<()>,
}

impl Broker {
    pub fn builder(
        volatile: Arc<dyn Storage>,
        durable: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
    ) -> BrokerBuilder {
        BrokerBuilder::new(volatile, durable, transport)
    }

    fn store(&self, durability: Durability) -> &Arc<dyn Storage> {
        match durability {
            Durability::Durable => &self.durable,
            Durability::Volatile => &self.volatile,
        }
    }

    /// `strand` を持つストアを探す（durable が先）
    async fn owner(&self, strand: &str) -> Result<Option<Durability>, BrokerError> {
        for durability in [Durability::Durable, Durability::Volatile] {
            let found = self
                .store(durability)
                .has_strand(strand)
                .await
                .map_err(|e| BrokerError::from_storage(strand, e))?;
            if found {
                return Ok(Some(durability));
            }
        }
        Ok(None)
    }

    async fn require_owner(&self, strand: &str) -> Result<Durability, BrokerError> {
        self.owner(strand)
            .await?
            .ok_or_else(|| BrokerError::StrandNotFound(strand.to_string()))
    }

    /// Push the strand's current unacked count to the metrics sink, best effort.
    async fn report_depth(&self, durability: Durability, strand: &str) {
        match self.store(durability).unacked(strand).await {
            Ok(depth) => self.metrics.queue_depth(strand, depth),
            Err(err) => tracing::debug!(strand, error = %err, "queue depth unavailable"),
        }
    }

    /// Which store owns `strand`, if any.
    pub async fn durability(&self, strand: &str) -> Result<Option<Durability>, BrokerError> {
        let _guard = self.lock.lock().await;
        self.owner(strand).await
    }

    /// Configuration recorded for `strand` at registration.
    pub async fn strand_config(&self, strand: &str) -> Result<StrandConf, BrokerError> {
        let _guard = self.lock.lock().await;
        let durability = self.require_owner(strand).await?;
        self.store(durability)
            .strand_config(strand)
            .await
            .map_err(|e| BrokerError::from_storage(strand, e))?
            .ok_or_else(|| BrokerError::StrandNotFound(strand.to_string()))
    }

    /// `conf.durable` で選んだストアに `strand` を登録する
    ///
    /// どちらかのストアに既にあれば `StrandExists`（strand はちょうど 1 つのストアにだけ存在する）。
    /// id の検証はここだけで行う。他の呼び出しでは不正な id は未登録の strand と同じ扱い。
    pub async fn strand_add(&self, strand: &str, conf: StrandConf) -> Result<(), BrokerError> {
        validate_strand_id(strand).map_err(|reason| BrokerError::InvalidStrand {
            strand: strand.to_string(),
            reason,
        })?;
        let _guard = self.lock.lock().await;

        if let Some(current) = self.owner(strand).await? {
            tracing::warn!(strand, ?current, "strand already registered");
            return Err(BrokerError::StrandExists(strand.to_string()));
        }
        if conf.ordered && !self.transport.preserves_order() {
            tracing::warn!(strand, "ordered strand routed over a transport that may reorder");
        }

        let durability = Durability::of(conf);
        self.store(durability)
            .create_strand(strand, conf)
            .await
            .map_err(|e| BrokerError::from_storage(strand, e))?;

        self.metrics.queue_depth(strand, 0);
        tracing::info!(strand, ?durability, ordered = conf.ordered, "strand added");
        Ok(())
    }

    /// 新しい envelope を永続化してから送信する
    ///
    /// - 永続化に失敗したら何も送らない
    /// - 送信に失敗したら呼び出しは失敗するが、envelope は recovery 用に残る
    #[tracing::instrument(level = "debug", skip(self, payload))]
    pub async fn send(&self, strand: &str, payload: &str) -> Result<Msg, BrokerError> {
        let _guard = self.lock.lock().await;

        let durability = self.require_owner(strand).await?;
        let stamp = self.id_generator.generate();
        let msg = Msg::new(stamp.id, strand, payload, stamp.timestamp);

        self.store(durability)
            .save(&msg)
            .await
            .map_err(|e| BrokerError::from_storage(strand, e))?;
        self.report_depth(durability, strand).await;

        if let Err(err) = self.transport.send_message(&msg).await {
            tracing::error!(strand, msg_id = msg.id(), error = %err, "message send failed, kept for recovery");
            return Err(BrokerError::transport(strand, err));
        }

        self.metrics.message_sent(strand);
        tracing::debug!(msg_id = msg.id(), "message sent");
        Ok(msg)
    }

    /// `strand` の次の envelope を待つ。ack はしない
    pub async fn receive(&self, strand: &str) -> Result<Msg, BrokerError> {
        {
            let _guard = self.lock.lock().await;
            self.require_owner(strand).await?;
        }

        let msg = self
            .transport
            .receive_message(strand)
            .await
            .map_err(|err| {
                if err.is_disconnected() {
                    tracing::warn!(strand, error = %err, "no messages available");
                    BrokerError::MessageUnavailable {
                        strand: strand.to_string(),
                        source: err,
                    }
                } else {
                    BrokerError::transport(strand, err)
                }
            })?;

        self.metrics.message_received(strand);
        tracing::debug!(strand, msg_id = msg.id(), "message received");
        Ok(msg)
    }

    /// `msg_id` の永続化済みコピーを消す。2 回目の ack はエラー
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn acknowledge(&self, strand: &str, msg_id: &str) -> Result<Msg, BrokerError> {
        let _guard = self.lock.lock().await;

        let durability = self.require_owner(strand).await?;
        let mut msg = self
            .store(durability)
            .acknowledge(strand, msg_id)
            .await
            .map_err(|err| {
                tracing::error!(strand, msg_id, error = %err, "acknowledgment failed");
                BrokerError::from_storage(strand, err)
            })?;
        msg.mark_acked();

        self.report_depth(durability, strand).await;
        tracing::debug!("message acknowledged");
        Ok(msg)
    }

    /// Drop `strand` and every unacknowledged envelope it holds.
    pub async fn strand_remove(&self, strand: &str) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;

        let durability = self.require_owner(strand).await?;
        self.store(durability)
            .delete_strand(strand)
            .await
            .map_err(|e| BrokerError::from_storage(strand, e))?;

        self.metrics.queue_depth(strand, 0);
        tracing::info!(strand, ?durability, "strand removed");
        Ok(())
    }
}
