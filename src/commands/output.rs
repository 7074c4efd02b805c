//! `stratum output` - print stored outputs

use super::Session;
use crate::Context;
use crate::cli::OutputArgs;
use crate::ui;
use anyhow::Result;
use declarative::{OutputValue, State};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn run(ctx: &Context, args: &OutputArgs) -> Result<()> {
    let session = Session::load(ctx)?;
    let state = State::load(&session.state_path)?;

    match &args.name {
        Some(name) => {
            let output = state
                .outputs
                .get(name)
                .ok_or_else(|| declarative::Error::UnknownOutput(name.clone()))?;
            println!("{}", render_one(output, args.json)?);
        }
        None if args.json => println!("{}", render_all_json(&state.outputs)?),
        None => ui::outputs(&state.outputs),
    }
    Ok(())
}

/// A single output is printed raw: strings without quotes
fn render_one(output: &OutputValue, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(&output.value)?);
    }
    Ok(match &output.value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)?,
    })
}

fn render_all_json(outputs: &BTreeMap<String, OutputValue>) -> Result<String> {
    Ok(serde_json::to_string_pretty(outputs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(value: Value) -> OutputValue {
        OutputValue {
            value,
            sensitive: false,
            description: None,
        }
    }

    #[test]
    fn test_render_one_raw() {
        let url = output(json!("http://203.0.113.10:8080"));
        assert_eq!(render_one(&url, false).unwrap(), "http://203.0.113.10:8080");
        assert_eq!(render_one(&url, true).unwrap(), "\"http://203.0.113.10:8080\"");
        assert_eq!(render_one(&output(json!(3)), false).unwrap(), "3");
    }

    #[test]
    fn test_render_all_json() {
        let mut outputs = BTreeMap::new();
        outputs.insert("port".to_string(), output(json!(8080)));
        let rendered: Value = serde_json::from_str(&render_all_json(&outputs).unwrap()).unwrap();
        assert_eq!(rendered["port"]["value"], json!(8080));
        assert_eq!(rendered["port"]["sensitive"], json!(false));
    }
}
