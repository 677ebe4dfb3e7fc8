//! Writes the objstore OpenAPI document.
//!
//! Usage: `export-openapi [--json] [OUTPUT]`. YAML is the default format;
//! without OUTPUT the document goes to stdout.

use std::{env, fs, path::Path};

use anyhow::{bail, Context, Result};
use objstore_daemon::server::docs::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let mut as_json = false;
    let mut output = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--json" => as_json = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ if output.is_some() => bail!("more than one output path given"),
            _ => output = Some(arg),
        }
    }

    let openapi = ApiDoc::openapi();
    let rendered = if as_json {
        openapi
            .to_pretty_json()
            .context("failed to serialise OpenAPI as JSON")?
    } else {
        openapi.to_yaml().context("failed to serialise OpenAPI")?
    };

    let Some(path) = output else {
        println!("{rendered}");
        return Ok(());
    };

    let path = Path::new(&path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory for {}", path.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}
