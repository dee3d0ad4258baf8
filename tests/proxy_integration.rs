use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use mio::Poll;
use sni_table_proxy::config;
use sni_table_proxy::reactor::Server;

/// Builds a minimal TLS 1.2-shaped ClientHello record carrying either a
/// single SNI hostname or no extensions at all.
fn client_hello(hostname: Option<&str>) -> Vec<u8> {
    let extensions = match hostname {
        Some(name) => {
            let mut entry = vec![0u8]; // host_name
            entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
            entry.extend_from_slice(name.as_bytes());

            let mut list = (entry.len() as u16).to_be_bytes().to_vec();
            list.extend_from_slice(&entry);

            let mut ext = 0u16.to_be_bytes().to_vec(); // server_name extension type
            ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
            ext.extend_from_slice(&list);
            ext
        }
        None => Vec::new(),
    };

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&[0x13, 0x01]);
    body.push(1);
    body.push(0);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

fn spawn_proxy(config_src: &'static str) {
    thread::spawn(move || {
        let cfg = config::parse_str(config_src).expect("test config parses");
        let mut poll = Poll::new().expect("poll");
        let mut server = Server::new(&cfg, &poll).expect("server binds");
        server.run(&mut poll).expect("reactor runs");
    });
    thread::sleep(Duration::from_millis(300));
}

/// Accepts one connection, echoes back whatever it reads, for as long as
/// the test needs it.
fn spawn_echo_backend(addr: &'static str) {
    let listener = TcpListener::bind(addr).expect("backend binds");
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
}

#[test]
fn tls_sni_routes_to_matching_backend() {
    spawn_echo_backend("127.0.0.1:19301");
    spawn_proxy(
        r#"
        table {
            example.test 127.0.0.1 19301;
        }
        listener 127.0.0.1 19401 {
            protocol tls;
        }
        "#,
    );

    let mut stream = TcpStream::connect("127.0.0.1:19401").expect("connect to proxy");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let hello = client_hello(Some("example.test"));
    stream.write_all(&hello).unwrap();

    let mut echoed = vec![0u8; hello.len()];
    stream.read_exact(&mut echoed).expect("echoed ClientHello bytes");
    assert_eq!(echoed, hello);
}

#[test]
fn http_host_header_routes_to_matching_backend() {
    spawn_echo_backend("127.0.0.1:19302");
    spawn_proxy(
        r#"
        table {
            foo.test 127.0.0.1 19302;
        }
        listener 127.0.0.1 19402 {
            protocol http;
        }
        "#,
    );

    let mut stream = TcpStream::connect("127.0.0.1:19402").expect("connect to proxy");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let req = b"GET / HTTP/1.1\r\nHost: foo.test\r\n\r\n";
    stream.write_all(req).unwrap();

    let mut echoed = vec![0u8; req.len()];
    stream.read_exact(&mut echoed).expect("echoed request bytes");
    assert_eq!(&echoed, req);
}

#[test]
fn tls_client_hello_without_sni_uses_fallback() {
    spawn_echo_backend("127.0.0.1:19303");
    spawn_proxy(
        r#"
        table {
            example.test 127.0.0.1 19999;
        }
        listener 127.0.0.1 19403 {
            protocol tls;
            fallback 127.0.0.1 19303;
        }
        "#,
    );

    let mut stream = TcpStream::connect("127.0.0.1:19403").expect("connect to proxy");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let hello = client_hello(None);
    stream.write_all(&hello).unwrap();

    let mut echoed = vec![0u8; hello.len()];
    stream.read_exact(&mut echoed).expect("fallback backend echoes ClientHello");
    assert_eq!(echoed, hello);
}

#[test]
fn no_table_match_and_no_fallback_closes_client() {
    spawn_proxy(
        r#"
        table {
            example.test 127.0.0.1 19998;
        }
        listener 127.0.0.1 19404 {
            protocol tls;
        }
        "#,
    );

    let mut stream = TcpStream::connect("127.0.0.1:19404").expect("connect to proxy");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let hello = client_hello(Some("unrouted.test"));
    stream.write_all(&hello).unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read after unroutable hostname");
    assert_eq!(n, 0, "client half should observe EOF once routing fails with no fallback");
}

#[test]
fn backend_connect_failure_does_not_crash_reactor() {
    spawn_proxy(
        r#"
        table {
            dead.test 127.0.0.1 19997;
        }
        listener 127.0.0.1 19405 {
            protocol tls;
        }
        "#,
    );

    let mut stream = TcpStream::connect("127.0.0.1:19405").expect("connect to proxy");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let hello = client_hello(Some("dead.test"));
    stream.write_all(&hello).unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read after backend connect failure");
    assert_eq!(n, 0, "a failed backend connect should tear down the whole flow once buffers drain");

    // A second proxy on its own listener still accepts new connections,
    // proving the failed backend connect didn't take the reactor down.
    spawn_echo_backend("127.0.0.1:19304");
    let cfg = format!(
        "table {{ ok.test 127.0.0.1 19304; }} listener 127.0.0.1 19406 {{ protocol tls; }}"
    );
    spawn_proxy(Box::leak(cfg.into_boxed_str()));

    let mut stream2 = TcpStream::connect("127.0.0.1:19406").expect("second proxy still serves");
    stream2.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let hello2 = client_hello(Some("ok.test"));
    stream2.write_all(&hello2).unwrap();
    let mut echoed = vec![0u8; hello2.len()];
    stream2.read_exact(&mut echoed).expect("second proxy echoes");
    assert_eq!(echoed, hello2);
}
