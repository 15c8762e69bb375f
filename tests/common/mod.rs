#![allow(dead_code)]

use anyhow::Result;
use ldapflow::entry::Entry;
use ldapflow::server::{InMemoryDirectory, InMemoryDirectoryServer};

pub const BASE: &str = "dc=example,dc=com";

pub fn person(uid: &str, ou: &str) -> Entry {
    Entry::new(format!("uid={uid},ou={ou},{BASE}"))
        .with_attribute("objectClass", ["top", "person"])
        .with_attribute("uid", [uid])
        .with_attribute("cn", [uid.to_uppercase()])
}

/// `dc=example,dc=com` with `ou=people` holding `count` people.
pub fn people_directory(count: usize) -> Result<InMemoryDirectory> {
    let mut directory = InMemoryDirectory::new([BASE]);
    directory.add(Entry::new(BASE).with_attribute("objectClass", ["top", "domain"]))?;
    directory.add(
        Entry::new(format!("ou=people,{BASE}")).with_attribute("objectClass", ["organizationalUnit"]),
    )?;
    for i in 0..count {
        directory.add(person(&format!("user{i}"), "people"))?;
    }
    Ok(directory)
}

pub fn free_port() -> Result<u16> {
    let sock = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = sock.local_addr()?.port();
    drop(sock);
    Ok(port)
}

/// Serve `server` on the current runtime and wait until it accepts.
pub async fn spawn_server(server: InMemoryDirectoryServer) -> Result<u16> {
    let port = free_port()?;
    let bind = format!("127.0.0.1:{port}");
    tokio::spawn(async move {
        let _ = server.serve(&bind).await;
    });
    for _ in 0..50u32 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    Ok(port)
}
