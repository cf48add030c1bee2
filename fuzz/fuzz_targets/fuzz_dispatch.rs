#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use realm_protocol::core::frame::InboundFrame;
use realm_protocol::protocol::dispatcher::Dispatcher;

fuzz_target!(|data: &[u8]| {
    let Some((&opcode, payload)) = data.split_first() else {
        return;
    };
    if let Ok(dispatcher) = Dispatcher::standard() {
        let frame = InboundFrame {
            opcode,
            payload: Bytes::copy_from_slice(payload),
        };
        let _ = dispatcher.dispatch(&frame);
    }
});
