use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::primitive::EventReceiver;
use crate::interface_adapter::controller::bridge_controller::{BridgeController, BridgeMessage};

/// Serve the JSON-lines bridge on stdin/stdout until stdin closes and every
/// session has exited.
pub async fn run(controller: BridgeController, events: EventReceiver) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(stdin, stdout, controller, events).await
}

pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    mut controller: BridgeController,
    mut events: EventReceiver,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut input_open = true;

    loop {
        if !input_open && controller.is_idle() {
            break;
        }
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    for message in controller.handle_line(&line) {
                        write_message(&mut writer, &message).await?;
                    }
                }
                None => {
                    input_open = false;
                    controller.shutdown();
                }
            },
            Some(event) = events.recv() => {
                for message in controller.handle_event(event) {
                    write_message(&mut writer, &message).await?;
                }
            }
            else => break,
        }
    }

    writer.flush().await?;
    Ok(())
}

async fn write_message<W>(writer: &mut W, message: &BridgeMessage) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
