//! Records the values PUT or POSTed to a URI path, one line per update,
//! and serves the program version on GET /ver.
//!
//! Start with `cargo run --example recorder -- [uripath [filename]]`.

use std::{cell::RefCell, env, fs::File, io::Write, rc::Rc};

use coap_mote::{error::HandlingError, CoapServer, PayloadValue, ResourceTransfer};

const VERSION: &str = "0.1";

fn main() -> std::io::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .unwrap();

    let mut args = env::args().skip(1);
    let uripath = args.next().unwrap_or_else(|| "/ping".to_string());
    let filename = args.next().unwrap_or_else(|| "ping.txt".to_string());

    let server = CoapServer::new()?;
    let channel = Rc::new(RefCell::new(File::create(&filename)?));

    server.register_for_get(|transfer| {
        if transfer.path.as_deref() == Some("/ver") {
            transfer.value = Some(PayloadValue::Text(VERSION.into()));
            Ok(())
        } else {
            Err(HandlingError::not_found())
        }
    });

    let put_path = uripath.clone();
    let put_channel = Rc::clone(&channel);
    server.register_for_put(move |transfer| {
        record_value(&put_path, &put_channel, transfer)
    });

    let post_path = uripath.clone();
    let post_channel = Rc::clone(&channel);
    server.register_for_post(move |transfer| {
        record_value(&post_path, &post_channel, transfer)
    });

    log::info!("recording {} to {}", uripath, filename);
    println!("Sock it to me!");
    let mut server = server;
    server.start()
}

fn record_value(
    uripath: &str,
    channel: &RefCell<File>,
    transfer: &mut ResourceTransfer,
) -> Result<(), HandlingError> {
    if transfer.path.as_deref() != Some(uripath) {
        return Err(HandlingError::not_found());
    }

    let line = match &transfer.value {
        Some(PayloadValue::Text(text)) => text.clone(),
        Some(PayloadValue::Bytes(bytes)) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        _ => return Err(HandlingError::bad_request("expected a text value")),
    };

    let mut channel = channel.borrow_mut();
    writeln!(channel, "{}", line)
        .and_then(|()| channel.flush())
        .map_err(HandlingError::internal)
}
