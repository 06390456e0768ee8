use snafu::Snafu;

use super::controller::ControllerError;
use super::service::TransportError;

/// Failures that stop the command-line client before or between sessions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    #[snafu(display("failed to set up the chat service on `{stage}`"))]
    SetupService {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("controller call failed on `{stage}`"))]
    Controller {
        stage: &'static str,
        source: ControllerError,
    },
    #[snafu(display("failed to read input on `{stage}`"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to install log subscriber on `{stage}`: {message}"))]
    InstallLogging {
        stage: &'static str,
        message: String,
    },
}
