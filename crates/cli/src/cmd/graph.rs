use anyhow::Result;

use crate::cmd::builtin_graph;

pub fn cmd_graph() -> Result<()> {
  print!("{}", builtin_graph()?.to_dot());
  Ok(())
}
