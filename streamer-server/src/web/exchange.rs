// 阻塞处理器与异步响应体之间的桥接
//
// 处理器在阻塞线程上运行，状态和头部先缓存在本地，
// 第一个响应体分块到来（或 finish/send_error）时一次性提交响应头。
// 之后的分块通过有界通道送入 axum 的流式响应体，通道满时阻塞读取方。

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::io;
use streamer_core::{Exchange, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

type BodyItem = Result<Bytes, io::Error>;

/// 响应头（尚未提交）
struct PendingHead {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: oneshot::Sender<Response>,
    body_rx: mpsc::Receiver<BodyItem>,
}

/// 基于通道的请求/响应
pub struct ChannelExchange {
    query: HashMap<String, String>,
    head: Option<PendingHead>,
    body_tx: Option<mpsc::Sender<BodyItem>>,
}

impl ChannelExchange {
    /// 创建交换对象，返回等待响应头的接收端
    ///
    /// `buffer` 为通道中最多缓冲的分块数，必须大于0。
    pub fn new(
        query: HashMap<String, String>,
        buffer: usize,
    ) -> (Self, oneshot::Receiver<Response>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(buffer.max(1));
        let exchange = Self {
            query,
            head: Some(PendingHead {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                head_tx,
                body_rx,
            }),
            body_tx: Some(body_tx),
        };
        (exchange, head_rx)
    }

    fn pending_head(&mut self) -> Result<&mut PendingHead, TransportError> {
        if self.body_tx.is_none() {
            return Err(TransportError::Closed);
        }
        self.head.as_mut().ok_or(TransportError::HeadersSent)
    }

    /// 提交响应头，响应体从通道读取
    fn commit(&mut self) -> Result<(), TransportError> {
        let Some(head) = self.head.take() else {
            return Ok(());
        };
        let body = Body::from_stream(ReceiverStream::new(head.body_rx));
        let mut response = Response::new(body);
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;

        debug!("Committing response head: {}", head.status);
        head.head_tx
            .send(response)
            .map_err(|_| TransportError::ConnectionLost)
    }
}

impl Exchange for ChannelExchange {
    fn query_value(&self, key: &str) -> Option<String> {
        self.query.get(key).cloned()
    }

    fn set_status(&mut self, status: StatusCode) -> Result<(), TransportError> {
        self.pending_head()?.status = status;
        Ok(())
    }

    fn set_content_type(&mut self, content_type: &str) -> Result<(), TransportError> {
        self.set_header(CONTENT_TYPE.as_str(), content_type)
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let head = self.pending_head()?;
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        // 允许UTF-8文件名（obs-text），拒绝控制字符
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        head.headers.insert(header_name, header_value);
        Ok(())
    }

    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        if self.body_tx.is_none() {
            return Err(TransportError::Closed);
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.commit()?;

        let tx = self.body_tx.as_ref().ok_or(TransportError::Closed)?;
        tx.blocking_send(Ok(chunk)).map_err(|_| {
            debug!("Response body receiver dropped");
            TransportError::ConnectionLost
        })
    }

    fn finish(&mut self) -> Result<(), TransportError> {
        if self.body_tx.is_none() {
            return Err(TransportError::Closed);
        }
        let result = self.commit();
        // 关闭发送端即发出终止分块
        self.body_tx = None;
        result
    }

    fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), TransportError> {
        let Some(tx) = self.body_tx.take() else {
            return Err(TransportError::Closed);
        };

        match self.head.take() {
            Some(head) => {
                let mut response = Response::new(Body::from(message.to_string()));
                *response.status_mut() = status;
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                head.head_tx
                    .send(response)
                    .map_err(|_| TransportError::ConnectionLost)
            }
            None => {
                // 响应体已经开始，只能中止传输
                warn!("Aborting response body: {}", message);
                tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, message.to_string())))
                    .map_err(|_| TransportError::ConnectionLost)
            }
        }
    }
}

impl Drop for ChannelExchange {
    fn drop(&mut self) {
        if self.body_tx.is_some() {
            if let Err(e) = self.commit() {
                debug!("Failed to commit response head on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Results = Vec<Result<(), TransportError>>;

    async fn run<F>(
        query: HashMap<String, String>,
        buffer: usize,
        work: F,
    ) -> (Response, tokio::task::JoinHandle<Results>)
    where
        F: FnOnce(&mut ChannelExchange) -> Results + Send + 'static,
    {
        let (mut exchange, head_rx) = ChannelExchange::new(query, buffer);
        let task = tokio::task::spawn_blocking(move || work(&mut exchange));
        (head_rx.await.unwrap(), task)
    }

    async fn body_bytes(response: Response) -> Result<Bytes, axum::Error> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await
    }

    #[tokio::test]
    async fn test_streams_chunks_with_buffered_head() {
        let (response, task) = run(HashMap::new(), 1, |ex| {
            vec![
                ex.set_status(StatusCode::OK),
                ex.set_content_type("application/octet-stream"),
                ex.set_header("X-Part-Name", "log.bin"),
                ex.send_chunk(Bytes::from_static(b"hello ")),
                ex.send_chunk(Bytes::new()),
                ex.send_chunk(Bytes::from_static(b"world")),
                ex.finish(),
            ]
        })
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/octet-stream");
        assert_eq!(response.headers()["x-part-name"], "log.bin");
        assert_eq!(body_bytes(response).await.unwrap(), "hello world");
        assert!(task.await.unwrap().iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_headers_rejected_after_first_chunk() {
        let (response, task) = run(HashMap::new(), 4, |ex| {
            vec![
                ex.send_chunk(Bytes::from_static(b"data")),
                ex.set_status(StatusCode::NOT_FOUND),
                ex.set_header("X-Late", "1"),
                ex.finish(),
                ex.send_chunk(Bytes::from_static(b"more")),
            ]
        })
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.unwrap(), "data");
        assert_eq!(
            task.await.unwrap(),
            vec![
                Ok(()),
                Err(TransportError::HeadersSent),
                Err(TransportError::HeadersSent),
                Ok(()),
                Err(TransportError::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_before_body_is_real_response() {
        let (response, task) = run(HashMap::new(), 4, |ex| {
            vec![
                ex.set_header("X-Part-Name", "missing.bin"),
                ex.send_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send file"),
                ex.finish(),
            ]
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("x-part-name").is_none());
        assert_eq!(body_bytes(response).await.unwrap(), "Failed to send file");
        assert_eq!(
            task.await.unwrap(),
            vec![Ok(()), Ok(()), Err(TransportError::Closed)]
        );
    }

    #[tokio::test]
    async fn test_error_after_body_aborts_transfer() {
        let (response, task) = run(HashMap::new(), 4, |ex| {
            vec![
                ex.send_chunk(Bytes::from_static(b"partial")),
                ex.send_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send file"),
            ]
        })
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_bytes(response).await.is_err());
        assert!(task.await.unwrap().iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_connection_lost() {
        let (response, task) = run(HashMap::new(), 1, |ex| {
            let mut results = vec![ex.send_chunk(Bytes::from_static(b"first"))];
            // 等待接收端被丢弃
            std::thread::sleep(std::time::Duration::from_millis(50));
            for _ in 0..4 {
                results.push(ex.send_chunk(Bytes::from_static(b"next")));
            }
            results
        })
        .await;
        drop(response);

        let results = task.await.unwrap();
        assert_eq!(results[0], Ok(()));
        assert_eq!(results.last(), Some(&Err(TransportError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_drop_without_finish_commits_head() {
        let (response, _task) = run(HashMap::new(), 4, |ex| {
            vec![ex.set_status(StatusCode::NO_CONTENT)]
        })
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(body_bytes(response).await.unwrap().is_empty());
    }

    #[test]
    fn test_query_and_invalid_header() {
        let query = HashMap::from([("from".to_string(), "a.txt".to_string())]);
        let (mut exchange, _head_rx) = ChannelExchange::new(query, 1);

        assert_eq!(exchange.query_value("from").as_deref(), Some("a.txt"));
        assert_eq!(exchange.query_value("to"), None);
        assert_eq!(
            exchange.set_header("bad header", "x"),
            Err(TransportError::InvalidHeader("bad header".to_string()))
        );
        assert!(matches!(
            exchange.set_header("X-Part-Name", "line\nbreak"),
            Err(TransportError::InvalidHeader(_))
        ));
    }
}
