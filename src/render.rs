use serde_derive::Serialize;
use std::collections::HashMap;
use std::io::Write;
use tera::{Context, Tera, Value};

use crate::defs::{Edge, Kind, DEFAULT_TEMPLATE};

const TEMPLATE_NAME: &str = "call";

/// Everything an output template can refer to.
#[derive(Debug, Serialize, Clone)]
pub struct CallOutput<'a> {
    pub row: usize,
    pub line: u32,
    pub occurrences: u64,
    pub caller_fn: &'a str,
    pub caller_file: &'a str,
    pub callee_fn: &'a str,
    pub callee_file: &'a str,
    pub measurement: String,
    pub unit: &'static str,
    pub percentage: String,
}

impl<'a> CallOutput<'a> {
    pub fn new(row: usize, edge: &'a Edge, kind: Kind, percentage: Option<f64>) -> Self {
        Self {
            row,
            line: edge.line,
            occurrences: edge.occurrences,
            caller_fn: &edge.caller_name,
            caller_file: &edge.caller_file,
            callee_fn: &edge.callee_name,
            callee_file: &edge.callee_file,
            measurement: format!("{:.3}", edge.measurement(kind)),
            unit: kind.unit(),
            percentage: percentage.map_or_else(|| "n/a".to_string(), |p| format!("{p:.3}")),
        }
    }
}

/// `{{ s | abbr(len=40) }}`: keeps the last `len` characters behind "...".
pub fn abbr(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("abbr expects a string"))?;
    let len = args
        .get("len")
        .and_then(Value::as_u64)
        .ok_or_else(|| tera::Error::msg("abbr expects a numeric len argument"))?;
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    let count = s.chars().count();
    if count <= len {
        return Ok(Value::String(s.to_string()));
    }
    let tail: String = s.chars().skip(count - len).collect();
    Ok(Value::String(format!("...{tail}")))
}

/// Turns the two-character sequences `\n` and `\t` typed at a prompt into the real characters.
pub fn unescape(input: &str) -> String {
    input.replace("\\n", "\n").replace("\\t", "\t")
}

pub struct OutputTemplate {
    tera: Tera,
    source: String,
}

impl OutputTemplate {
    pub fn new(source: &str) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.register_filter("abbr", abbr);
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        Ok(Self {
            tera,
            source: source.to_string(),
        })
    }

    pub fn builtin() -> Result<Self, tera::Error> {
        Self::new(DEFAULT_TEMPLATE)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render_to(&self, call: &CallOutput<'_>, out: impl Write) -> Result<(), tera::Error> {
        let context = Context::from_serialize(call)?;
        self.tera.render_to(TEMPLATE_NAME, &context, out)
    }

    pub fn render(&self, call: &CallOutput<'_>) -> Result<String, tera::Error> {
        let mut buf = Vec::new();
        self.render_to(call, &mut buf)?;
        String::from_utf8(buf).map_err(tera::Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge() -> Edge {
        Edge {
            caller_name: "{main}".to_string(),
            caller_file: "/srv/app/public/index.php".to_string(),
            callee_name: "App\\Kernel::handle".to_string(),
            callee_file: "/srv/app/src/Kernel.php".to_string(),
            line: 20,
            time_seconds: 1.5,
            memory_kilobytes: 0.25,
            occurrences: 2,
        }
    }

    fn len(n: u64) -> HashMap<String, Value> {
        HashMap::from([("len".to_string(), json!(n))])
    }

    #[test]
    fn abbr_keeps_the_tail() {
        assert_eq!(abbr(&json!("short"), &len(10)).unwrap(), json!("short"));
        assert_eq!(abbr(&json!("abcdefgh"), &len(3)).unwrap(), json!("...fgh"));
        assert_eq!(abbr(&json!("äöüß"), &len(2)).unwrap(), json!("...üß"));
        assert!(abbr(&json!(3), &len(2)).is_err());
        assert!(abbr(&json!("x"), &HashMap::new()).is_err());
    }

    #[test]
    fn default_template() {
        let edge = edge();
        let call = CallOutput::new(1, &edge, Kind::Time, Some(37.5));
        let out = OutputTemplate::builtin().unwrap().render(&call).unwrap();
        assert_eq!(
            out,
            "(1) 1.500 sec [37.500%]:\n\
             \t/srv/app/public/index.php:{main}\n\
             \t-> /srv/app/src/Kernel.php::App\\Kernel::handle\n\
             \t(line: 20, times: 2)\n\n"
        );
    }

    #[test]
    fn missing_percentage_is_not_available() {
        let edge = edge();
        let call = CallOutput::new(3, &edge, Kind::Memory, None);
        let template = OutputTemplate::new("{{ row }} {{ measurement }}{{ unit }} {{ percentage }}").unwrap();
        assert_eq!(template.render(&call).unwrap(), "3 0.250kB n/a");
    }

    #[test]
    fn custom_template_with_abbr() {
        let edge = edge();
        let call = CallOutput::new(1, &edge, Kind::Time, None);
        let template = OutputTemplate::new("{{ callee_file | abbr(len=10) }}").unwrap();
        assert_eq!(template.render(&call).unwrap(), "...Kernel.php");
    }

    #[test]
    fn broken_template_is_rejected() {
        assert!(OutputTemplate::new("{{ row ").is_err());
    }

    #[test]
    fn prompt_escapes() {
        assert_eq!(unescape("({{ row }})\\n\\t{{ line }}"), "({{ row }})\n\t{{ line }}");
    }
}
