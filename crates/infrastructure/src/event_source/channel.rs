use async_trait::async_trait;
use scheduler_core::traits::EventSource;
use scheduler_core::{SchedulerError, SchedulerResult};
use tokio::sync::mpsc;

/// 进程内事件源，嵌入方通过 [`ChannelEventSender`] 推送原始报文
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<Vec<u8>>,
}

/// 事件通道发送端，可克隆
#[derive(Debug, Clone)]
pub struct ChannelEventSender {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelEventSource {
    pub fn new(capacity: usize) -> (Self, ChannelEventSender) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { receiver }, ChannelEventSender { sender })
    }
}

impl ChannelEventSender {
    /// 发送原始报文，通道满时等待
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> SchedulerResult<()> {
        self.sender
            .send(payload.into())
            .await
            .map_err(|_| SchedulerError::MessageQueue("事件通道已关闭".to_string()))
    }

    pub async fn send_json(&self, event: &serde_json::Value) -> SchedulerResult<()> {
        self.send(serde_json::to_vec(event)?).await
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> SchedulerResult<Option<Vec<u8>>> {
        Ok(self.receiver.recv().await)
    }

    async fn close(&mut self) -> SchedulerResult<()> {
        self.receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_preserves_order_and_ends_when_senders_drop() {
        let (mut source, sender) = ChannelEventSource::new(8);

        sender.send(b"first".to_vec()).await.unwrap();
        sender
            .send_json(&json!({"type": "worker-online", "hostname": "w1"}))
            .await
            .unwrap();
        drop(sender);

        assert_eq!(source.next_event().await.unwrap().unwrap(), b"first".to_vec());
        let second = source.next_event().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&second).unwrap();
        assert_eq!(value["hostname"], "w1");
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut source, sender) = ChannelEventSource::new(1);
        source.close().await.unwrap();

        assert!(sender.send(b"late".to_vec()).await.is_err());
    }
}
