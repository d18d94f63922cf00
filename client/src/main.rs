use clap::Parser;
use client::directory::PlayerDirectory;
use client::input::{Input, InputParser, Target, HELP};
use client::rendering::Renderer;
use client::{ClientConfig, PartyClient};
use log::{error, info};
use shared::{Command, PlayerId};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name to log in with
    #[arg(short = 'n', long)]
    name: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Milliseconds before an unacknowledged command counts as failed
    #[arg(long, default_value = "5000")]
    command_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let config = ClientConfig::new(&args.server, &args.name)
        .with_simulated_latency(Duration::from_millis(args.fake_ping))
        .with_command_timeout(Duration::from_millis(args.command_timeout_ms));

    let (party, mut notifications) = PartyClient::connect(config).await?;
    let parser = InputParser::new(party.player_id());
    println!("Logged in as {} (player {})", args.name, party.player_id());
    println!("Type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                let roster = party.players().await?;
                if let Some(line) = Renderer::new(&roster).describe(&notification) {
                    println!("{}", line);
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parser.parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => {
                        if let Err(e) = handle_input(&party, input).await {
                            println!("{}", e);
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    party.logout().await?;
    info!("Logged out");
    Ok(())
}

async fn handle_input(party: &PartyClient, input: Input) -> Result<(), Box<dyn std::error::Error>> {
    match input {
        Input::Command(command) => {
            party.submit(command).await?;
        }
        Input::Invite(target) => {
            let player_id = resolve(party, target).await?;
            party.invite(player_id).await?;
        }
        Input::CancelInvite(target) => {
            let player_id = resolve(party, target).await?;
            party.submit(Command::CancelInvite { player_id }).await?;
        }
        Input::Kick(target) => {
            let player_id = resolve(party, target).await?;
            party.submit(Command::KickMember { player_id }).await?;
        }
        Input::Status => {
            let roster = party.players().await?;
            print!("{}", Renderer::new(&roster).render(&party.snapshot()));
        }
        Input::Who(query) => {
            let candidates = party.invite_candidates(&query).await?;
            if candidates.is_empty() {
                println!("Nobody to invite");
            }
            for player in candidates {
                println!("  {:>4} {}", player.id, player.name);
            }
        }
        Input::Refresh => party.request_refresh()?,
        Input::Help => println!("{}", HELP),
        Input::Quit => {}
    }
    Ok(())
}

async fn resolve(party: &PartyClient, target: Target) -> Result<PlayerId, Box<dyn std::error::Error>> {
    match target {
        Target::Id(id) => Ok(id),
        Target::Name(name) => {
            let roster = party.players().await?;
            match roster.find_by_name(&name) {
                Some(player) => Ok(player.id),
                None => {
                    error!("Unknown player {}", name);
                    Err(format!("no player named '{}'", name).into())
                }
            }
        }
    }
}
