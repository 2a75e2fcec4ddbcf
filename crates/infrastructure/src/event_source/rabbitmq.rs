use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, Channel, Connection, ConnectionProperties, Consumer,
    ExchangeKind,
};
use scheduler_core::config::EventSourceConfig;
use scheduler_core::traits::EventSource;
use scheduler_core::{SchedulerError, SchedulerResult};
use tracing::{debug, info, warn};

/// RabbitMQ事件源
///
/// 声明topic交换机与事件队列并绑定路由键，以自动确认模式消费。
/// 事件是可丢失的遥测数据，不做手动确认。
pub struct RabbitMQEventSource {
    connection: Connection,
    _channel: Channel,
    consumer: Consumer,
}

impl RabbitMQEventSource {
    pub async fn connect(config: &EventSourceConfig) -> SchedulerResult<Self> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(&config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue(format!("连接RabbitMQ超时: {}", config.url)))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明交换机 {} 失败: {e}", config.exchange))
            })?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {} 失败: {e}", config.queue))
            })?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("绑定队列失败: {e}")))?;

        let consumer_tag = consumer_tag();
        let consumer = channel
            .basic_consume(
                &config.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费者失败: {e}")))?;

        debug!(
            "事件队列 {} 已绑定到 {} ({})，消费者: {}",
            config.queue, config.exchange, config.routing_key, consumer_tag
        );

        Ok(Self {
            connection,
            _channel: channel,
            consumer,
        })
    }
}

fn consumer_tag() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("periodic-scheduler@{host}-{}", std::process::id())
}

#[async_trait]
impl EventSource for RabbitMQEventSource {
    async fn next_event(&mut self) -> SchedulerResult<Option<Vec<u8>>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(delivery.data)),
            Some(Err(e)) => {
                warn!("接收事件失败: {}", e);
                Err(SchedulerError::MessageQueue(format!("接收事件失败: {e}")))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
