//! 줄 단위 스트림
//!
//! 바이트 스트림 위에서 프레임을 한 줄씩 주고받는다. 재전송 타이머는 별도
//! 태스크가 아니라 읽기 마감 시각(deadline)으로 처리한다.

use std::io;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::message::{Frame, LineBuffer};
use crate::{Error, Result, DEFAULT_READ_BUFFER_SIZE};

/// 한 번의 대기 결과
#[derive(Debug)]
pub enum Incoming {
    /// 완전한 줄들 (한 번 이상의 읽기)
    Lines(Vec<Bytes>),
    /// 마감 시각까지 완전한 줄이 없었음
    TimedOut,
    /// 상대방이 스트림을 닫음
    Closed,
}

/// 상대방이 연결을 끊어서 생긴 IO 에러는 [`Error::ConnectionClosed`]로 바꾼다
fn stream_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => Error::ConnectionClosed,
        _ => Error::Io(e),
    }
}

/// 줄 단위 프레임 스트림
#[derive(Debug)]
pub struct LineStream<S> {
    stream: S,
    lines: LineBuffer,
    read_buf: Vec<u8>,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_buffer_size(stream, DEFAULT_READ_BUFFER_SIZE)
    }

    pub fn with_buffer_size(stream: S, read_buffer_size: usize) -> Self {
        Self {
            stream,
            lines: LineBuffer::with_capacity(read_buffer_size),
            read_buf: vec![0u8; read_buffer_size.max(1)],
        }
    }

    /// 개행 없이 쌓을 수 있는 한 줄의 최대 길이
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.lines = self.lines.with_max_line(max_line);
        self
    }

    /// 프레임 전송
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        trace!(kind = frame.kind(), "-> {}", frame);
        self.send_raw(&frame.to_bytes()).await
    }

    /// 이미 직렬화된 줄 전송 (개행 포함이어야 함)
    ///
    /// 상대방이 이미 닫았으면 [`Error::ConnectionClosed`].
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(stream_error)?;
        self.stream.flush().await.map_err(stream_error)?;
        Ok(())
    }

    /// 완전한 줄이 모일 때까지 대기
    ///
    /// `deadline`이 None이면 무기한 대기한다. 이미 버퍼에 완전한 줄이 있으면
    /// 읽지 않고 바로 반환한다.
    pub async fn recv_batch(&mut self, deadline: Option<Instant>) -> Result<Incoming> {
        loop {
            let lines = self.lines.drain_lines();
            if !lines.is_empty() {
                return Ok(Incoming::Lines(lines));
            }

            let read = self.stream.read(&mut self.read_buf);
            let n = match deadline {
                Some(deadline) => {
                    let deadline = tokio::time::Instant::from_std(deadline);
                    match tokio::time::timeout_at(deadline, read).await {
                        Ok(result) => result.map_err(stream_error)?,
                        Err(_) => return Ok(Incoming::TimedOut),
                    }
                }
                None => read.await.map_err(stream_error)?,
            };

            if n == 0 {
                return Ok(Incoming::Closed);
            }
            self.lines.extend(&self.read_buf[..n])?;
        }
    }

    /// 다음 한 줄 (닫히면 None)
    ///
    /// 같은 읽기로 들어온 뒤따르는 줄은 버퍼에 남는다.
    pub async fn recv_line(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(line));
            }
            let n = self.stream.read(&mut self.read_buf).await.map_err(stream_error)?;
            if n == 0 {
                return Ok(None);
            }
            self.lines.extend(&self.read_buf[..n])?;
        }
    }

    /// 쓰기 방향 종료
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
