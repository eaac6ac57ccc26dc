//! 帧编解码：`u32` 大端长度前缀 + 载荷，双向执行消息大小预算。
//!
//! # 契约说明（What）
//! - 预算在编码（发送前）与解码（读长度前缀后、读载荷前）两侧执行，
//!   超限以 `rpc.frame_oversize` 报告具体限额与越界长度；
//! - 请求载荷 = `u16` 服务名长度 + 服务名字节 + 方法体；
//!   响应载荷 = `u8` 状态（0 成功，1 失败）+ 方法体或 UTF-8 错误文案；
//! - 解码端对被截断的载荷返回 `rpc.io`，连接随后按不可信处理关闭。

use beacon_core::{CoreError, codes};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 默认消息大小预算：4 MiB。
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// 传输操作名，用于错误文案定位。
pub(crate) mod op {
    pub const CONNECT: &str = "connect";
    pub const BIND: &str = "bind";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
}

pub(crate) fn map_io(op: &'static str, err: io::Error) -> CoreError {
    CoreError::new(codes::RPC_IO, format!("rpc {op} failed")).with_cause(err)
}

fn oversize(direction: &'static str, len: usize, limit: usize) -> CoreError {
    CoreError::new(
        codes::RPC_FRAME_OVERSIZE,
        format!("{direction} frame of {len} bytes exceeds budget of {limit} bytes"),
    )
}

/// 写出一帧；超出预算时不产生任何字节。
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    limit: usize,
) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > limit {
        return Err(oversize("outbound", payload.len(), limit));
    }
    let mut head = [0u8; 4];
    head.copy_from_slice(&(payload.len() as u32).to_be_bytes());
    writer
        .write_all(&head)
        .await
        .map_err(|err| map_io(op::WRITE, err))?;
    writer
        .write_all(payload)
        .await
        .map_err(|err| map_io(op::WRITE, err))?;
    writer.flush().await.map_err(|err| map_io(op::WRITE, err))
}

/// 读入一帧；长度前缀超出预算时立即失败，不消费载荷。
pub(crate) async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Bytes, CoreError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    reader
        .read_exact(&mut head)
        .await
        .map_err(|err| map_io(op::READ, err))?;
    let len = u32::from_be_bytes(head) as usize;
    if len > limit {
        return Err(oversize("inbound", len, limit));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|err| map_io(op::READ, err))?;
    Ok(Bytes::from(payload))
}

/// 编码请求载荷。服务名长度受 `u16` 约束，超长属于配置错误。
pub(crate) fn encode_request(service: &str, body: &[u8]) -> Result<Bytes, CoreError> {
    if service.len() > usize::from(u16::MAX) {
        return Err(CoreError::new(
            codes::RPC_IO,
            format!("service name of {} bytes does not fit the wire format", service.len()),
        ));
    }
    let mut buf = BytesMut::with_capacity(2 + service.len() + body.len());
    buf.put_u16(service.len() as u16);
    buf.put_slice(service.as_bytes());
    buf.put_slice(body);
    Ok(buf.freeze())
}

pub(crate) fn decode_request(mut payload: Bytes) -> Result<(String, Bytes), CoreError> {
    if payload.remaining() < 2 {
        return Err(CoreError::new(codes::RPC_IO, "request frame truncated"));
    }
    let name_len = usize::from(payload.get_u16());
    if payload.remaining() < name_len {
        return Err(CoreError::new(codes::RPC_IO, "request frame truncated"));
    }
    let name_bytes = payload.split_to(name_len);
    let service = std::str::from_utf8(&name_bytes)
        .map_err(|_| CoreError::new(codes::RPC_IO, "service name is not UTF-8"))?
        .to_string();
    Ok((service, payload))
}

pub(crate) fn encode_response(result: &Result<Bytes, CoreError>) -> Bytes {
    match result {
        Ok(body) => {
            let mut buf = BytesMut::with_capacity(1 + body.len());
            buf.put_u8(0);
            buf.put_slice(body);
            buf.freeze()
        }
        Err(err) => {
            let text = err.to_string();
            let mut buf = BytesMut::with_capacity(1 + text.len());
            buf.put_u8(1);
            buf.put_slice(text.as_bytes());
            buf.freeze()
        }
    }
}

pub(crate) fn decode_response(mut payload: Bytes) -> Result<Bytes, CoreError> {
    if payload.remaining() < 1 {
        return Err(CoreError::new(codes::RPC_IO, "response frame truncated"));
    }
    match payload.get_u8() {
        0 => Ok(payload),
        _ => Err(CoreError::new(
            codes::RPC_REMOTE,
            String::from_utf8_lossy(&payload).into_owned(),
        )),
    }
}
