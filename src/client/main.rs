use anstyle::{AnsiColor, Style};
use clap::{Parser, Subcommand};
use reqwest::{Response, StatusCode};
use zcospace::{
    api::{CreateParams, QueueSnapshot, SourceKind},
    Direction, ObjectId,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[arg(short, long, default_value = "localhost:4560")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates an object, empty unless a medium is given.
    Create {
        direction: Direction,

        #[arg(short, long, requires = "length")]
        medium: Option<SourceKind>,

        /// Handle on the medium, or the id of the object to copy from.
        #[arg(long, default_value = "0")]
        location: String,

        #[arg(long, default_value = "0")]
        offset: u64,

        #[arg(short, long)]
        length: Option<u64>,

        #[arg(short, long, default_value = "0")]
        coarse: u8,

        #[arg(short, long, default_value = "0")]
        fine: u8,

        /// Waits for space instead of giving up.
        #[arg(short, long)]
        wait: bool,
    },
    /// Releases an object.
    Release { id: ObjectId },
    /// Prints a direction's queue.
    Queue { direction: Direction },
}

fn status_style(status: StatusCode) -> Style {
    let color = if status.is_success() {
        AnsiColor::Green
    } else {
        AnsiColor::Red
    };
    Style::new().bold().fg_color(Some(color.into()))
}

async fn report(res: Response) -> anyhow::Result<()> {
    let status = res.status();
    let style = status_style(status);
    println!("{style}{status}{style:#}: {}", res.text().await?.trim_end());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args { server, command } = Args::parse();
    let client = reqwest::Client::new();

    match command {
        Command::Create {
            direction,
            medium,
            location,
            offset,
            length,
            coarse,
            fine,
            wait,
        } => {
            let params = CreateParams {
                medium,
                location,
                offset,
                length: length.unwrap_or_default(),
                coarse,
                fine,
                wait,
            };
            let url = format!("http://{server}/{direction}/objects");
            report(client.post(url).form(&params).send().await?).await?;
        }
        Command::Release { id } => {
            let url = format!("http://{server}/objects/{id}");
            report(client.delete(url).send().await?).await?;
        }
        Command::Queue { direction } => {
            let res = client
                .get(format!("http://{server}/{direction}"))
                .send()
                .await?;

            if res.status().is_success() {
                let bytes = res.bytes().await?;
                let snapshot: QueueSnapshot = postcard::from_bytes(&bytes)?;
                print!("{snapshot}");
            } else {
                report(res).await?;
            }
        }
    }

    Ok(())
}
