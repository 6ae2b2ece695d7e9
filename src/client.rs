//! Thin client: turns CLI subcommands into requests and prints responses.
use std::env;

use crate::{
    cli::Commands,
    error::ProtocolError,
    paths::Paths,
    protocol::{self, Request, Response, StatusSnapshot},
};

/// Sends the request behind a subcommand and prints the daemon's answer.
///
/// Returns `false` when the daemon answered with an error, so the binary
/// can exit non-zero.
pub fn run(paths: &Paths, command: Commands) -> Result<bool, ProtocolError> {
    let request = build_request(command)?;
    let response = protocol::send_request(paths, &request)?;
    Ok(print_response(response))
}

fn build_request(command: Commands) -> Result<Request, ProtocolError> {
    let request = match command {
        Commands::Add { command } => Request::Add {
            command: command.join(" "),
            path: env::current_dir()?,
        },
        Commands::Remove { keys } => Request::Remove { keys },
        Commands::Switch { first, second } => Request::Switch { first, second },
        Commands::Send { key, input } => Request::Send { key, input },
        Commands::Status => Request::Status,
        Commands::Start { keys } => Request::Start { keys },
        Commands::Pause { keys, wait } => Request::Pause { keys, wait },
        Commands::Stash { keys } => Request::Stash { keys },
        Commands::Enqueue { keys } => Request::Enqueue { keys },
        Commands::Restart { keys } => Request::Restart { keys },
        Commands::Stop { keys, remove } => Request::Stop { keys, remove },
        Commands::Kill {
            keys,
            remove,
            signal,
        } => Request::Kill {
            keys,
            remove,
            signal,
        },
        Commands::Reset => Request::Reset,
        Commands::Clear => Request::Clear,
        Commands::Config { option, value } => Request::Config { option, value },
    };
    Ok(request)
}

fn print_response(response: Response) -> bool {
    match response {
        Response::Success(message) => {
            println!("{message}");
            true
        }
        Response::Error(message) => {
            eprintln!("{message}");
            false
        }
        Response::Status(snapshot) => {
            print_status(&snapshot);
            true
        }
    }
}

fn print_status(snapshot: &StatusSnapshot) {
    println!("Daemon: {}", snapshot.state);

    if snapshot.tasks.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!();
    println!(
        "{:<5} {:<9} {:<5} {:<6} {:<6} Command",
        "Key", "Status", "Code", "Start", "End"
    );
    for (key, task) in &snapshot.tasks {
        let returncode = task
            .returncode
            .map_or(String::new(), |code| code.to_string());
        println!(
            "{:<5} {:<9} {:<5} {:<6} {:<6} {}",
            key,
            task.status.to_string(),
            returncode,
            task.start,
            task.end,
            task.command
        );
        println!("{:<34} {}", "", task.path.display());
    }
}
