use async_trait::async_trait;

use crate::SchedulerResult;

/// 生命周期事件源
///
/// 按到达顺序产出原始事件报文，解码由摄取管道负责，
/// 这样格式错误的事件可以在管道内统一记录并丢弃。
#[async_trait]
pub trait EventSource: Send {
    /// 下一条原始事件；事件源关闭后返回None
    async fn next_event(&mut self) -> SchedulerResult<Option<Vec<u8>>>;

    /// 关闭底层连接
    async fn close(&mut self) -> SchedulerResult<()>;
}
