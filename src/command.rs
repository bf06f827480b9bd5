use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// One fgamma invocation.
///
/// The simulator takes its physics parameters as a single packed first
/// argument, `E=<energy>,aoi=<aoi>,n=<events>`; everything in `extra_args`
/// is appended verbatim after it.
#[derive(Debug, Clone)]
pub struct SimCommand {
    pub executable: PathBuf,
    /// Photon energy in GeV.
    pub energy: f64,
    /// Angle-of-incidence parameter in `0..=1`.
    pub aoi: f64,
    /// Event count for this run.
    pub events: u64,
    pub extra_args: Vec<String>,
}

impl SimCommand {
    /// The packed `E=..,aoi=..,n=..` parameter token.
    pub fn param_token(&self) -> String {
        format!("E={},aoi={},n={}", self.energy, self.aoi, self.events)
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(self.param_token());
        cmd.args(&self.extra_args);
        cmd
    }

    /// The same invocation with a different event count.
    pub fn with_events(&self, events: u64) -> SimCommand {
        SimCommand {
            events,
            ..self.clone()
        }
    }
}

impl fmt::Display for SimCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.executable.display(), self.param_token())?;
        for arg in &self.extra_args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
