//! Login shell discovery.
//!
//! The backend is always exec'd through the invoking user's login shell with
//! `-c`, the way an interactive session would run it, rather than trusting
//! `$SHELL` — many service-manager environments do not set it at all.

use nix::unistd::{Uid, User};

const FALLBACK_SHELL: &str = "/bin/sh";

pub fn login_shell() -> String {
  match User::from_uid(Uid::current()) {
    Ok(Some(user)) => {
      let shell = user.shell.to_string_lossy().into_owned();
      if shell.is_empty() {
        FALLBACK_SHELL.to_string()
      } else {
        shell
      }
    }
    _ => FALLBACK_SHELL.to_string(),
  }
}
