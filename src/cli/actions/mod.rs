pub mod server;

// The match over `Action` lives in its own module so this one stays
// declarations-only.
mod run;

/// What the parsed command line asks the process to do.
#[derive(Debug)]
pub enum Action {
    /// Serve the HTTP API.
    Server(server::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
