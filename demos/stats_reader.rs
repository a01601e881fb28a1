//! Queries statistics from a RIOT gcoap endpoint: sends a NON GET for
//! /.well-known/core and prints whatever comes back. A fixed source port
//! is worth passing when the server pushes periodic observe responses.
//!
//! Run with `cargo run --example stats_reader -- <host[:port]> [source-port]`.

use std::{env, net::SocketAddr, process};

use coap_mote::{
    CoapClient, Message, MessageClass, MessageType, RequestType, COAP_PORT,
};

fn main() -> std::io::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let mut args = env::args().skip(1);
    let host = match args.next() {
        Some(host) => host,
        None => {
            eprintln!("usage: stats_reader <host[:port]> [source-port]");
            process::exit(2);
        }
    };
    let dest: SocketAddr = host
        .parse()
        .or_else(|_| format!("{}:{}", host, COAP_PORT).parse())
        .unwrap_or_else(|error| {
            eprintln!("bad host address {}: {}", host, error);
            process::exit(2);
        });
    let source_port: u16 = args
        .next()
        .map(|port| port.parse().expect("bad source port"))
        .unwrap_or(0);

    let mut client = CoapClient::new(source_port, Some(dest))?;
    client.register_for_response(|inbound| {
        println!(
            "{} from {}: {}",
            inbound.message.header.code,
            inbound.source,
            String::from_utf8_lossy(&inbound.message.payload)
        );
        Ok(())
    });

    let mut request = Message::new();
    request.header.message_type = MessageType::NonConfirmable;
    request.header.code = MessageClass::Request(RequestType::Get);
    request.header.message_id = client.next_message_id();
    request.set_path("/.well-known/core");
    client.send(&request, None);

    println!("Starting stats reader");
    client.start()
}
