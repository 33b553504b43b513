//! Storage port - strand 登録 + メッセージ永続化
//!
//! Broker は volatile と durable の `Storage` を 1 つずつ持つ。
//! strand とその未 ack メッセージはどちらか一方にだけ存在する。
//!
//! # 実装
//! - **MemoryStore**: map ベース、再起動で消える
//! - **SledStore**: 組み込み KV ストア、書き込みごとに flush

use async_trait::async_trait;

use crate::domain::{Msg, StorageError, StrandConf};

/// Storage は永続化の境界
///
/// # 保証
/// - durable なバックエンドの `save` はディスクに書いてから返る
/// - `acknowledge` はちょうど 1 件消すか、失敗する
/// - 更新は同じ strand を読む並行処理に対してアトミック
#[async_trait]
pub trait Storage: Send + Sync {
    /// strand を登録する。登録済みなら `StrandExists`
    async fn create_strand(&self, strand: &str, conf: StrandConf) -> Result<(), StorageError>;

    /// strand を未 ack メッセージごと削除する
    async fn delete_strand(&self, strand: &str) -> Result<(), StorageError>;

    async fn has_strand(&self, strand: &str) -> Result<bool, StorageError>;

    async fn strand_config(&self, strand: &str) -> Result<Option<StrandConf>, StorageError>;

    /// 登録済みの全 strand（id 順）
    async fn strands(&self) -> Result<Vec<(String, StrandConf)>, StorageError>;

    /// Persist one envelope keyed by `(strand, id)`.
    async fn save(&self, msg: &Msg) -> Result<(), StorageError>;

    /// Remove one persisted envelope and hand it back.
    async fn acknowledge(&self, strand: &str, msg_id: &str) -> Result<Msg, StorageError>;

    /// Number of unacknowledged envelopes held for `strand`.
    async fn unacked(&self, strand: &str) -> Result<usize, StorageError>;

    /// 全 strand の未 ack envelope を `(strand, id)` 順に返すカーソル
    async fn unacked_iterator(&self) -> Result<UnackedCursor, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;

    /// 全データを消して空で開き直す
    async fn reset(&self) -> Result<(), StorageError>;

    /// データを保ったまま閉じて開き直す
    async fn reload(&self) -> Result<(), StorageError>;
}

/// 未 ack envelope を 1 回だけ走査するスコープ付きカーソル
///
/// バックエンドが持つ読み取りビューは `close` か drop で解放される（早期 return でも漏れない）
pub struct UnackedCursor {
    inner: Option<Box<dyn Iterator<Item = Result<Msg, StorageError>> + Send>>,
}

impl UnackedCursor {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Msg, StorageError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::new(iter)),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// 次の envelope。読み切るか close 済みなら `Ok(None)`
    pub fn next_message(&mut self) -> Result<Option<Msg>, StorageError> {
        match self.inner.as_mut().and_then(Iterator::next) {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(err)) => Err(err),
            None => {
                self.inner = None;
                Ok(None)
            }
        }
    }

    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Iterator for UnackedCursor {
    type Item = Result<Msg, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}
