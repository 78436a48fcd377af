use chatrelay::chat::{ChatPlatform, IrcSettings, TwitchIrc};
use chatrelay::ChatEvent;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn settings(port: u16) -> IrcSettings {
    IrcSettings {
        host: "127.0.0.1".into(),
        port,
        tls: false,
        nick: "RelayBot".into(),
        oauth_token: "abcdefghij0123456789".into(),
        reconnect_base_delay_ms: 10,
    }
}

/// Reads client lines until one starts with `prefix`, returning every line seen.
async fn read_until(reader: &mut BufReader<TcpStream>, prefix: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let mut line = String::new();
        match tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await {
            Ok(Ok(0)) => panic!("client hung up, saw {:?}", seen),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("read failed: {}", e),
            Err(_) => panic!("timed out waiting for {}, saw {:?}", prefix, seen),
        }
        let line = line.trim_end().to_string();
        let done = line.starts_with(prefix);
        seen.push(line);
        if done {
            return seen;
        }
    }
}

async fn accept(listener: &TcpListener) -> BufReader<TcpStream> {
    match tokio::time::timeout(Duration::from_secs(5), listener.accept()).await {
        Ok(Ok((stream, _))) => BufReader::new(stream),
        Ok(Err(e)) => panic!("accept failed: {}", e),
        Err(_) => panic!("client never connected"),
    }
}

async fn send(conn: &mut BufReader<TcpStream>, line: &str) {
    if let Err(e) = conn.get_mut().write_all(format!("{}\r\n", line).as_bytes()).await {
        panic!("server write failed: {}", e);
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ChatEvent>) -> ChatEvent {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event source closed"),
        Err(_) => panic!("no chat event arrived"),
    }
}

#[tokio::test]
async fn test_reconnects_and_rejoins_after_server_reconnect() {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {}", e),
    };
    let port = match listener.local_addr() {
        Ok(a) => a.port(),
        Err(e) => panic!("no local addr: {}", e),
    };

    let (tx, mut rx) = mpsc::channel(16);
    let irc = match TwitchIrc::connect(settings(port), tx).await {
        Ok(irc) => irc,
        Err(e) => panic!("connect failed: {:?}", e),
    };

    let mut first = accept(&listener).await;
    let login = read_until(&mut first, "NICK").await;
    assert!(login.contains(&"PASS oauth:abcdefghij0123456789".to_string()));
    assert!(login.contains(&"NICK relaybot".to_string()));

    if let Err(e) = irc.join("Streamer").await {
        panic!("join failed: {:?}", e);
    }
    read_until(&mut first, "JOIN #streamer").await;

    send(&mut first, ":a!a@a.tmi.twitch.tv PRIVMSG #oldchannel :left behind").await;
    send(&mut first, "@display-name=Alice :alice!alice@alice.tmi.twitch.tv PRIVMSG #streamer :before").await;
    send(&mut first, ":tmi.twitch.tv RECONNECT").await;

    let event = next_event(&mut rx).await;
    assert_eq!(event, ChatEvent::new("Alice", "before"));

    // Close the socket entirely; the client must come back on its own.
    drop(first);
    let mut second = accept(&listener).await;
    let relogin = read_until(&mut second, "JOIN").await;
    assert!(relogin.iter().any(|l| l.starts_with("PASS oauth:")));
    assert_eq!(relogin.last().map(String::as_str), Some("JOIN #streamer"));

    send(&mut second, ":bob!bob@bob.tmi.twitch.tv PRIVMSG #streamer :after").await;
    let event = next_event(&mut rx).await;
    assert_eq!(event, ChatEvent::new("bob", "after"));

    if let Err(e) = irc.publish("streamer", "hi\nthere").await {
        panic!("publish after reconnect failed: {:?}", e);
    }
    read_until(&mut second, "PRIVMSG #streamer :hi there").await;
}

#[tokio::test]
async fn test_reconnects_after_plain_eof() {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {}", e),
    };
    let port = match listener.local_addr() {
        Ok(a) => a.port(),
        Err(e) => panic!("no local addr: {}", e),
    };

    let (tx, mut rx) = mpsc::channel(16);
    let irc = match TwitchIrc::connect(settings(port), tx).await {
        Ok(irc) => irc,
        Err(e) => panic!("connect failed: {:?}", e),
    };
    let mut first = accept(&listener).await;
    read_until(&mut first, "NICK").await;
    if let Err(e) = irc.join("streamer").await {
        panic!("join failed: {:?}", e);
    }
    read_until(&mut first, "JOIN #streamer").await;
    drop(first);

    let mut second = accept(&listener).await;
    read_until(&mut second, "JOIN #streamer").await;
    send(&mut second, ":carol!carol@carol.tmi.twitch.tv PRIVMSG #streamer :still here").await;
    assert_eq!(next_event(&mut rx).await, ChatEvent::new("carol", "still here"));
}

#[tokio::test]
async fn test_tls_connect_never_sends_token_in_clear() {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {}", e),
    };
    let port = match listener.local_addr() {
        Ok(a) => a.port(),
        Err(e) => panic!("no local addr: {}", e),
    };

    // A plaintext server: it records the first bytes and answers with non-TLS garbage.
    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        let mut buf = vec![0u8; 4096];
        let n = match tokio::time::timeout(Duration::from_secs(5), tokio::io::AsyncReadExt::read(conn.get_mut(), &mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => panic!("server read failed: {}", e),
            Err(_) => panic!("client sent nothing"),
        };
        send(&mut conn, ":tmi.twitch.tv NOTICE * :plaintext only").await;
        buf.truncate(n);
        buf
    });

    let (tx, _rx) = mpsc::channel(1);
    let mut tls = settings(port);
    tls.tls = true;
    assert!(TwitchIrc::connect(tls, tx).await.is_err());

    let first_bytes = match server.await {
        Ok(b) => b,
        Err(e) => panic!("server task failed: {}", e),
    };
    assert!(!first_bytes.is_empty());
    // TLS handshake record, not an IRC line.
    assert_eq!(first_bytes[0], 0x16);
    assert!(!String::from_utf8_lossy(&first_bytes).contains("PASS"));
}
