pub mod channel;
pub mod rabbitmq;

pub use channel::{ChannelEventSender, ChannelEventSource};
pub use rabbitmq::RabbitMQEventSource;

use scheduler_core::config::{EventSourceConfig, EventSourceType};
use scheduler_core::traits::EventSource;
use scheduler_core::SchedulerResult;
use tracing::{debug, info};

/// 按配置构造的事件源
pub struct EventSourceHandle {
    pub source: Box<dyn EventSource>,
    /// 进程内通道的发送端，RabbitMQ事件源时为None
    pub sender: Option<ChannelEventSender>,
}

pub struct EventSourceFactory;

impl EventSourceFactory {
    pub async fn create(
        config: &EventSourceConfig,
        channel_capacity: usize,
    ) -> SchedulerResult<EventSourceHandle> {
        debug!("创建事件源: {:?}", config.r#type);

        match config.r#type {
            EventSourceType::Rabbitmq => {
                info!("初始化RabbitMQ事件源");
                let source = RabbitMQEventSource::connect(config).await?;
                Ok(EventSourceHandle {
                    source: Box::new(source),
                    sender: None,
                })
            }
            EventSourceType::Channel => {
                info!("初始化进程内事件通道");
                let (source, sender) = ChannelEventSource::new(channel_capacity);
                Ok(EventSourceHandle {
                    source: Box::new(source),
                    sender: Some(sender),
                })
            }
        }
    }
}
