//! Blocking Modbus TCP client
//!
//! One request is in flight at a time; the connection is guarded by a mutex
//! so the client can be shared between threads. A failed transfer drops the
//! socket and the next request reconnects.

use crate::access::RegisterAccess;
use crate::error::{BusError, BusResult};
use crate::wire::{FrameBuffer, FunctionCode, Request, Response, encode_frame};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Unit id placed in every request
    pub unit_id: u8,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Time allowed for a response
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unit_id: regbus::consts::DEFAULT_UNIT_ID,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Default)]
struct Connection {
    stream: Option<TcpStream>,
    next_transaction: u16,
    frames: FrameBuffer,
}

/// Modbus TCP client implementing [`RegisterAccess`]
#[derive(Debug)]
pub struct ModbusTcpClient {
    peer: SocketAddr,
    config: ClientConfig,
    conn: Mutex<Connection>,
}

impl ModbusTcpClient {
    /// Resolve `addr` and open the connection
    pub fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> BusResult<Self> {
        let peer = addr.to_socket_addrs()?.next().ok_or_else(|| {
            BusError::from(io::Error::new(
                io::ErrorKind::InvalidInput,
                "address resolved to nothing",
            ))
        })?;
        let client = Self {
            peer,
            config,
            conn: Mutex::new(Connection::default()),
        };
        {
            let mut conn = client.conn.lock();
            client.ensure_connected(&mut conn)?;
        }
        Ok(client)
    }

    /// Server address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True while a socket is open
    pub fn is_connected(&self) -> bool {
        self.conn.lock().stream.is_some()
    }

    /// Close the socket; the next request reconnects
    pub fn disconnect(&self) {
        let mut conn = self.conn.lock();
        conn.stream = None;
        conn.frames.clear();
    }

    fn ensure_connected<'a>(&self, conn: &'a mut Connection) -> BusResult<&'a mut TcpStream> {
        if conn.stream.is_none() {
            let stream = TcpStream::connect_timeout(&self.peer, self.config.connect_timeout)?;
            stream.set_read_timeout(Some(self.config.request_timeout))?;
            stream.set_write_timeout(Some(self.config.request_timeout))?;
            stream.set_nodelay(true)?;
            debug!(peer = %self.peer, "connected to register bus");
            conn.frames.clear();
            conn.stream = Some(stream);
        }
        conn.stream
            .as_mut()
            .ok_or_else(|| BusError::protocol("connection unavailable"))
    }

    /// Send one request and wait for its response
    pub fn transact(&self, request: &Request) -> BusResult<Response> {
        request.validate()?;
        let mut conn = self.conn.lock();
        let result = self.exchange(&mut conn, request);
        if let Err(err) = &result {
            if err.is_connection() || matches!(err, BusError::Protocol { .. }) {
                warn!(peer = %self.peer, error = %err, "dropping bus connection");
                conn.stream = None;
                conn.frames.clear();
            }
        }
        match result? {
            Response::Exception { function, code } => Err(BusError::Exception { function, code }),
            response => Ok(response),
        }
    }

    fn exchange(&self, conn: &mut Connection, request: &Request) -> BusResult<Response> {
        conn.next_transaction = conn.next_transaction.wrapping_add(1);
        let transaction_id = conn.next_transaction;
        let frame = encode_frame(transaction_id, self.config.unit_id, &request.encode_pdu());

        self.ensure_connected(conn)?.write_all(&frame)?;

        let mut chunk = [0u8; 512];
        loop {
            while let Some((header, pdu)) = conn.frames.next_frame()? {
                if header.transaction_id != transaction_id {
                    debug!(
                        expected = transaction_id,
                        got = header.transaction_id,
                        "discarding stale response"
                    );
                    continue;
                }
                return Response::decode_pdu(&pdu, request.function());
            }
            let stream = self.ensure_connected(conn)?;
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "server closed the connection",
                )
                .into());
            }
            conn.frames.extend(&chunk[..n]);
        }
    }

    /// Read holding registers
    pub fn read_holding(&self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.read_with(FunctionCode::ReadHolding, address, count)
    }

    /// Read input registers
    pub fn read_input(&self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.read_with(FunctionCode::ReadInput, address, count)
    }

    fn read_with(&self, function: FunctionCode, address: u16, count: u16) -> BusResult<Vec<u16>> {
        let request = match function {
            FunctionCode::ReadInput => Request::ReadInput { address, count },
            _ => Request::ReadHolding { address, count },
        };
        match self.transact(&request)? {
            Response::Registers { values, .. } if values.len() == usize::from(count) => Ok(values),
            other => Err(BusError::protocol(format!(
                "unexpected read response: {other:?}"
            ))),
        }
    }

    /// Write a single register
    pub fn write_single(&self, address: u16, value: u16) -> BusResult<()> {
        match self.transact(&Request::WriteSingle { address, value })? {
            Response::WriteSingle { .. } => Ok(()),
            other => Err(BusError::protocol(format!(
                "unexpected write response: {other:?}"
            ))),
        }
    }

    /// Write consecutive registers in one request
    pub fn write_multiple(&self, address: u16, values: &[u16]) -> BusResult<()> {
        let request = Request::WriteMultiple {
            address,
            values: values.to_vec(),
        };
        match self.transact(&request)? {
            Response::WriteMultiple { quantity, .. } if usize::from(quantity) == values.len() => {
                Ok(())
            }
            other => Err(BusError::protocol(format!(
                "unexpected write response: {other:?}"
            ))),
        }
    }
}

impl RegisterAccess for ModbusTcpClient {
    fn read_registers(&self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.read_holding(address, count)
    }

    fn write_register(&self, address: u16, value: u16) -> BusResult<()> {
        self.write_single(address, value)
    }

    fn write_registers(&self, address: u16, values: &[u16]) -> BusResult<()> {
        self.write_multiple(address, values)
    }
}
