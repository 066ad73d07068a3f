use crate::database::Replica;
use crate::sync::{SynchronizationContext, SynchronizationError, SynchronizationStrategy};
use std::path::Path;

/// A command line run against one replica. Arguments and environment values may contain
/// placeholders, filled in from the replica's connection descriptor:
///
/// * `{location}`, `{user}`, `{password}`
/// * `{file}`: the dump file
/// * `{<property>}`: any descriptor property
#[derive(Clone, Debug)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        CommandTemplate {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, replica: &Replica, file: &Path) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(self.args.iter().map(|arg| expand(arg, replica, file)))
            .envs(self.env.iter().map(|(k, v)| (k, expand(v, replica, file))))
            .kill_on_drop(true);
        command
    }

    async fn run(&self, replica: &Replica, file: &Path) -> Result<(), SynchronizationError> {
        let output = self.command(replica, file).output().await?;
        if output.status.success() {
            return Ok(());
        }

        Err(SynchronizationError::Command {
            program: self.program.clone(),
            message: format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

fn expand(template: &str, replica: &Replica, file: &Path) -> String {
    let descriptor = replica.descriptor();
    let mut expanded = template
        .replace("{file}", &file.display().to_string())
        .replace("{location}", &descriptor.location);
    if let Some(credentials) = &descriptor.credentials {
        expanded = expanded
            .replace("{user}", &credentials.user)
            .replace("{password}", credentials.password.as_deref().unwrap_or(""));
    }
    for (key, value) in &descriptor.properties {
        expanded = expanded.replace(&format!("{{{}}}", key), value);
    }
    expanded
}

/// Dumps the source with the database's own tooling and restores the dump into the target.
pub struct DumpRestoreStrategy {
    dump: CommandTemplate,
    restore: CommandTemplate,
}

impl DumpRestoreStrategy {
    pub const ID: &'static str = "dump-restore";

    pub fn new(dump: CommandTemplate, restore: CommandTemplate) -> Self {
        DumpRestoreStrategy { dump, restore }
    }
}

#[async_trait::async_trait]
impl SynchronizationStrategy for DumpRestoreStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synchronize(&self, context: &SynchronizationContext) -> Result<(), SynchronizationError> {
        // Removed when dropped, whichever way this returns.
        let file = tempfile::NamedTempFile::new()?;

        slog::info!(context.logger(), "Dumping {}", context.source_replica().id());
        self.dump.run(context.source_replica(), file.path()).await?;

        slog::info!(context.logger(), "Restoring into {}", context.target_replica().id());
        self.restore.run(context.target_replica(), file.path()).await?;

        Ok(())
    }
}
