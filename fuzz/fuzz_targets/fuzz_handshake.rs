#![no_main]

use std::sync::Arc;

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use realm_protocol::protocol::handshake::LoginPolicy;
use realm_protocol::protocol::session::Session;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the pre-login stages arbitrary bytes in small reads
    let mut session = Session::with_server_key(Arc::new(LoginPolicy::default()), 7);
    let mut src = BytesMut::new();
    for chunk in data.chunks(7) {
        src.extend_from_slice(chunk);
        while let Ok(Some(_)) = session.decode(&mut src) {}
        if session.is_closed() {
            break;
        }
    }
});
