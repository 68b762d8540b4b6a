//! Request dispatch.
//!
//! Maps one decoded frame onto a bus operation and builds the response.
//! Validation failures become exception responses; they never close the
//! connection.

use regbus_bus::wire::{EXCEPTION_FLAG, ExceptionCode, FunctionCode, MbapHeader};
use regbus_bus::{RegisterBus, Request, Response};
use tracing::debug;

/// Unit id meaning "not significant" on Modbus TCP.
pub const UNIT_ID_ANY: u8 = 0xFF;

/// Answer one request PDU addressed to `header.unit_id`.
pub fn respond(bus: &RegisterBus, unit_id: u8, header: &MbapHeader, pdu: &[u8]) -> Response {
    let raw_function = pdu.first().copied().unwrap_or(0) & !EXCEPTION_FLAG;

    if header.unit_id != unit_id && header.unit_id != UNIT_ID_ANY {
        debug!(requested = header.unit_id, unit_id, "request for foreign unit id");
        return Response::Exception {
            function: raw_function,
            code: ExceptionCode::GatewayTargetFailed,
        };
    }

    let request = match Request::decode_pdu(pdu) {
        Ok(request) => request,
        Err(code) => {
            debug!(function = raw_function, ?code, "malformed request");
            return Response::Exception {
                function: raw_function,
                code,
            };
        }
    };

    let result = match &request {
        Request::ReadHolding { address, count } => bus
            .read_many(*address, usize::from(*count))
            .map(|values| Response::Registers {
                function: FunctionCode::ReadHolding,
                values,
            }),
        Request::ReadInput { address, count } => bus
            .read_many(*address, usize::from(*count))
            .map(|values| Response::Registers {
                function: FunctionCode::ReadInput,
                values,
            }),
        Request::WriteSingle { address, value } => {
            bus.write(*address, *value).map(|()| Response::WriteSingle {
                address: *address,
                value: *value,
            })
        }
        Request::WriteMultiple { address, values } => {
            bus.write_batch(*address, values)
                .map(|()| Response::WriteMultiple {
                    address: *address,
                    quantity: values.len() as u16,
                })
        }
    };

    result.unwrap_or_else(|err| Response::Exception {
        function: request.function() as u8,
        code: err.exception_code(),
    })
}
