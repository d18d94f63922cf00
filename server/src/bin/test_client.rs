//! Raw protocol probe: logs in, prints what the server pushes, pings once and
//! disconnects. Useful for checking a server without the full client.

use bincode::{deserialize, serialize};
use shared::{timestamp_ms, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse()?;
    let name = args.next().unwrap_or_else(|| "probe".to_string());

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        player_name: name.clone(),
    };
    socket.send_to(&serialize(&connect)?, server_addr).await?;
    println!("Sent Connect as {} to {}", name, server_addr);

    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    let mut pinged = false;

    loop {
        let received = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer)).await;
        let Ok(result) = received else {
            if pinged {
                break;
            }
            println!("No answer from server");
            return Ok(());
        };
        let (len, _) = result?;

        match deserialize::<Packet>(&buffer[..len])? {
            Packet::Connected { player_id } => {
                println!("Connected as player {}", player_id);
                let ping = Packet::Ping {
                    timestamp: timestamp_ms(),
                };
                socket.send_to(&serialize(&ping)?, server_addr).await?;
                pinged = true;
            }
            Packet::Disconnected { reason } => {
                println!("Refused: {}", reason);
                return Ok(());
            }
            Packet::Pong { timestamp } => {
                println!("Round trip {}ms", timestamp_ms().saturating_sub(timestamp));
            }
            Packet::Event(event) => println!("Event: {:?}", event),
            Packet::Directory { players } => {
                for player in players {
                    let status = if player.online { "online" } else { "offline" };
                    println!("  {:>4} {:<16} {}", player.id, player.name, status);
                }
            }
            other => println!("Unexpected: {:?}", other),
        }
    }

    socket
        .send_to(&serialize(&Packet::Disconnect)?, server_addr)
        .await?;
    println!("Disconnected");
    Ok(())
}
