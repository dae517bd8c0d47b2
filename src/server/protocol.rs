// Framed request/response boundary.
//
// Clients exchange length-prefixed frames; each request is answered with
// a status and either a tuple stream or an error object. The listener and
// authentication live outside this crate; only the frame shapes and codec
// are modeled here.

use crate::common::Tuple;
use crate::error::{DbError, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Request kinds a client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    BeginSession {
        database: String,
        user: String,
    },
    EndSession {
        session: u64,
    },
    ExecuteStatement {
        session: u64,
        statement: String,
    },
    PrepareStatement {
        session: u64,
        statement: String,
    },
    ExecutePrepare {
        session: u64,
        prepare_id: i32,
        parameters: Vec<Tuple>,
    },
    ErasePrepareStatement {
        session: u64,
        prepare_id: i32,
    },
    Sync,
    Disconnect,
    DeclareVariable {
        session: u64,
        name: String,
    },
    Checkpoint,
    StartExplain {
        session: u64,
    },
    EndExplain {
        session: u64,
    },
    CreateUser {
        user: String,
    },
    DropUser {
        user: String,
    },
    ChangePassword {
        user: String,
    },
    CheckReplication,
    TransferLogicalLog,
    StartReplication,
    QueryProductVersion,
}

/// Status answered before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    Success,
    HasMoreData,
    Error,
    Canceled,
}

/// One answer frame: the status plus either rows or an error string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: WireStatus,
    pub rows: Vec<Tuple>,
    pub error: Option<String>,
}

impl Response {
    pub fn success(rows: Vec<Tuple>) -> Self {
        Self {
            status: WireStatus::Success,
            rows,
            error: None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: WireStatus::Canceled,
            rows: Vec::new(),
            error: None,
        }
    }

    pub fn error(e: &DbError) -> Self {
        Self {
            status: WireStatus::Error,
            rows: Vec::new(),
            error: Some(e.to_string()),
        }
    }
}

const MAX_FRAME: usize = 16 * 1024 * 1024;

fn encode_frame<T: Serialize>(value: &T, out: &mut BytesMut) -> Result<()> {
    let body = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    if body.len() > MAX_FRAME {
        return Err(DbError::BadArgument(format!(
            "frame of {} bytes exceeds the limit",
            body.len()
        )));
    }
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
    Ok(())
}

fn decode_frame<T: for<'de> Deserialize<'de>>(buf: &mut BytesMut) -> Result<Option<T>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME {
        return Err(DbError::BadArgument(format!(
            "frame of {} bytes exceeds the limit",
            len
        )));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    buf.advance(4);
    let body = buf.split_to(len);
    let (value, _) = bincode::serde::decode_from_slice(&body, bincode::config::standard())?;
    Ok(Some(value))
}

pub fn encode_request(request: &Request, out: &mut BytesMut) -> Result<()> {
    encode_frame(request, out)
}

pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Request>> {
    decode_frame(buf)
}

pub fn encode_response(response: &Response, out: &mut BytesMut) -> Result<()> {
    encode_frame(response, out)
}

pub fn decode_response(buf: &mut BytesMut) -> Result<Option<Response>> {
    decode_frame(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;

    #[test]
    fn test_request_roundtrip() -> Result<()> {
        let mut buf = BytesMut::new();
        let req = Request::ExecuteStatement {
            session: 42,
            statement: "select 1".into(),
        };
        encode_request(&req, &mut buf)?;
        // partial frame is not enough
        let mut partial = BytesMut::from(&buf[..3]);
        assert_eq!(decode_request(&mut partial)?, None);

        let decoded = decode_request(&mut buf)?.expect("whole frame");
        assert_eq!(decoded, req);
        assert!(buf.is_empty());
        Ok(())
    }

    #[test]
    fn test_response_roundtrip() -> Result<()> {
        let mut buf = BytesMut::new();
        let resp = Response::success(vec![vec![Value::Integer(1), Value::Null]]);
        encode_response(&resp, &mut buf)?;
        let decoded = decode_response(&mut buf)?.expect("whole frame");
        assert_eq!(decoded, resp);
        Ok(())
    }
}
