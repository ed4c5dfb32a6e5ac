//! Line-oriented command grammar for the REPL and the demo script. Kept
//! deliberately small (spec.md §1 places the real admin/query API out of
//! scope) — just enough surface to exercise every hub-tree operation by
//! hand from a terminal.

use anyhow::{anyhow, bail, Context, Result};

use hub_core::{DataSample, DataType, HubConfig, NullTimerDriver, OutputSink, SystemClock};
use hub_tree::{DataHub, EntryId, Transform};

/// An unbounded in-memory `OutputSink`; the CLI has no event loop to
/// exercise backpressure against, so it just accepts everything.
struct BufSink(Vec<u8>);

impl OutputSink for BufSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }
}

pub struct Session {
    pub hub: DataHub<SystemClock, NullTimerDriver>,
}

impl Session {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hub: DataHub::new(config),
        }
    }

    pub fn root(&self) -> EntryId {
        self.hub.root()
    }

    /// Resolve a path to an entry, failing with a readable message rather
    /// than the raw `NotFound` the library returns.
    fn resolve(&self, path: &str) -> Result<EntryId> {
        let root = self.hub.root();
        self.hub
            .find_entry(root, path)?
            .ok_or_else(|| anyhow!("no such resource: {path}"))
    }

    /// Resolve a path for routing/default/override purposes, creating a
    /// Placeholder if nothing lives there yet instead of failing.
    fn resolve_or_create(&mut self, path: &str) -> Result<EntryId> {
        let root = self.hub.root();
        Ok(self.hub.get_resource(root, path)?)
    }

    /// Execute one line of input, returning text to print (if any).
    pub fn execute(&mut self, line: &str) -> Result<Option<String>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let root = self.hub.root();
        match words.as_slice() {
            [] => Ok(None),
            ["help"] => Ok(Some(HELP.to_string())),
            ["input", path, ty, units] => {
                self.hub.get_input(root, path, parse_type(ty)?, units)?;
                Ok(Some(format!("input {path} ready")))
            }
            ["output", path, ty, units] => {
                self.hub.get_output(root, path, parse_type(ty)?, units)?;
                Ok(Some(format!("output {path} ready")))
            }
            ["obs", path] => {
                self.hub.get_observation(root, path)?;
                Ok(Some(format!("observation {path} ready")))
            }
            ["source", dest, src] => {
                // Either side may not exist yet; routing an observation to a
                // producer that hasn't registered itself (or vice versa) is
                // expected, so both resolve through a Placeholder-creating
                // lookup rather than failing on a missing path.
                let d = self.resolve_or_create(dest)?;
                let s = self.resolve_or_create(src)?;
                self.hub.set_source(d, s)?;
                Ok(Some(format!("{dest} now sourced from {src}")))
            }
            ["unsource", dest] => {
                let d = self.resolve(dest)?;
                self.hub.clear_source(d)?;
                Ok(Some(format!("{dest} unsourced")))
            }
            ["default", path, ty, value @ ..] => {
                let id = self.resolve_or_create(path)?;
                let sample = parse_sample(ty, value)?;
                self.hub.set_default(id, sample)?;
                Ok(Some(format!("default set on {path}")))
            }
            ["override", path, ty, value @ ..] => {
                let id = self.resolve_or_create(path)?;
                let sample = parse_sample(ty, value)?;
                self.hub.set_override(id, sample)?;
                Ok(Some(format!("{path} overridden")))
            }
            ["clear-override", path] => {
                let id = self.resolve(path)?;
                self.hub.clear_override(id)?;
                Ok(Some(format!("override cleared on {path}")))
            }
            ["push", path, ty, value @ ..] => {
                let id = self.resolve(path)?;
                let sample = parse_sample(ty, value)?;
                let result = self.hub.push(id, sample.data_type(), sample)?;
                Ok(Some(format!("{result:?}")))
            }
            ["limit", path, "high", value] => {
                self.configure_obs(path, |o| o.high_limit = parse_optional_f64(value))
            }
            ["limit", path, "low", value] => {
                self.configure_obs(path, |o| o.low_limit = parse_optional_f64(value))
            }
            ["changeby", path, value] => {
                let cb: f64 = value.parse().context("changeby must be a number")?;
                self.configure_obs(path, |o| o.change_by = Some(cb))
            }
            ["minperiod", path, value] => {
                let mp: f64 = value.parse().context("minperiod must be a number")?;
                self.configure_obs(path, |o| o.min_period = mp)
            }
            ["extract", path, expr] => {
                let expr = expr.to_string();
                self.configure_obs(path, move |o| o.json_extraction = Some(expr.clone()))
            }
            ["maxcount", path, value] => {
                let n: usize = value.parse().context("maxcount must be a non-negative integer")?;
                let id = self.resolve(path)?;
                self.hub.set_max_count(id, n)?;
                Ok(Some(format!("maxCount on {path} set to {n}")))
            }
            ["transform", path, name] => {
                let id = self.resolve(path)?;
                self.hub.set_transform(id, parse_transform(name)?)?;
                Ok(Some(format!("transform on {path} set to {name}")))
            }
            ["backup-period", path, value] => {
                let secs: f64 = value.parse().context("backup-period must be a number")?;
                let id = self.resolve(path)?;
                self.hub.set_backup_period(id, secs)?;
                Ok(Some(format!("backupPeriod on {path} set to {secs}s")))
            }
            ["query", path, stat, start] => {
                let id = self.resolve(path)?;
                let start: f64 = start.parse().context("query start must be a number")?;
                let v = match *stat {
                    "min" => self.hub.query_min(id, start)?,
                    "max" => self.hub.query_max(id, start)?,
                    "mean" => self.hub.query_mean(id, start)?,
                    "stddev" => self.hub.query_stddev(id, start)?,
                    other => bail!("unknown aggregate `{other}` (min|max|mean|stddev)"),
                };
                Ok(Some(format!("{v}")))
            }
            ["read", path] => self.read_buffer(path, 0.0),
            ["read", path, start] => {
                let start: f64 = start.parse().context("read start must be a number")?;
                self.read_buffer(path, start)
            }
            ["value", path] => {
                let id = self.resolve(path)?;
                match self.hub.current_value(id) {
                    Some((_, sample)) => Ok(Some(sample.to_json_fragment())),
                    None => Ok(Some("(no current value)".to_string())),
                }
            }
            ["units", path] => {
                let id = self.resolve(path)?;
                match self.hub.units(id) {
                    Some(units) => Ok(Some(units.to_string())),
                    None => Ok(Some("(no units)".to_string())),
                }
            }
            ["delete", path] => {
                let id = self.resolve(path)?;
                self.hub.delete_entry(id)?;
                Ok(Some(format!("{path} deleted")))
            }
            ["fence", "enter"] => {
                self.hub.enter_update_fence();
                Ok(Some("update fence raised".to_string()))
            }
            ["fence", "leave"] => {
                self.hub.leave_update_fence()?;
                Ok(Some("update fence lowered".to_string()))
            }
            other => bail!("unrecognized command: {}\n{HELP}", other.join(" ")),
        }
    }

    fn configure_obs(
        &mut self,
        path: &str,
        f: impl FnOnce(&mut hub_tree::ObsState),
    ) -> Result<Option<String>> {
        let id = self.resolve(path)?;
        self.hub.configure_observation(id, f)?;
        Ok(Some(format!("{path} configured")))
    }

    /// Stream a buffer to a plain in-memory sink and print it in one shot;
    /// the CLI has no event loop, so it doesn't model "would block" at all
    /// — it just drains whatever the reader can produce immediately.
    fn read_buffer(&mut self, path: &str, start_after: f64) -> Result<Option<String>> {
        let id = self.resolve(path)?;
        let mut sink = BufSink(Vec::new());
        // `start_buffer_read`'s completion callback is ignored here; this
        // synchronous one-shot use drives completion off `resume_buffer_read`'s
        // own return value instead.
        let handle = self.hub.start_buffer_read(id, start_after, |_| {})?;
        loop {
            match self.hub.resume_buffer_read(handle, &mut sink)? {
                hub_tree::ReaderStep::Done => break,
                hub_tree::ReaderStep::Blocked => {
                    bail!("sink reported backpressure; nothing more to read")
                }
                hub_tree::ReaderStep::Progress => unreachable!("resume loops internally"),
            }
        }
        Ok(Some(String::from_utf8(sink.0).unwrap_or_default()))
    }
}

fn parse_type(s: &str) -> Result<DataType> {
    match s {
        "trigger" => Ok(DataType::Trigger),
        "bool" => Ok(DataType::Boolean),
        "num" => Ok(DataType::Numeric),
        "str" => Ok(DataType::String),
        "json" => Ok(DataType::Json),
        other => bail!("unknown data type `{other}` (trigger|bool|num|str|json)"),
    }
}

fn parse_sample(ty: &str, value_words: &[&str]) -> Result<DataSample> {
    let data_type = parse_type(ty)?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let value = value_words.join(" ");
    match data_type {
        DataType::Trigger => Ok(DataSample::trigger(now)),
        DataType::Boolean => Ok(DataSample::boolean(
            now,
            value.parse().context("boolean value must be true/false")?,
        )),
        DataType::Numeric => Ok(DataSample::numeric(
            now,
            value.parse().context("numeric value must be a number")?,
        )),
        DataType::String => Ok(DataSample::string(now, value)),
        DataType::Json => DataSample::json(now, value).map_err(Into::into),
    }
}

fn parse_optional_f64(s: &str) -> Option<f64> {
    if s == "none" {
        None
    } else {
        s.parse().ok()
    }
}

fn parse_transform(s: &str) -> Result<Transform> {
    match s {
        "none" => Ok(Transform::None),
        "mean" => Ok(Transform::Mean),
        "stddev" => Ok(Transform::StdDev),
        "max" => Ok(Transform::Max),
        "min" => Ok(Transform::Min),
        other => bail!("unknown transform `{other}` (none|mean|stddev|max|min)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session() -> (Session, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = HubConfig {
            profile: String::new(),
            backup_root: dir.path().to_path_buf(),
            max_path_len: 256,
            log_level: "info".into(),
        };
        (Session::new(config), dir)
    }

    #[test]
    fn drives_a_routed_push_end_to_end() {
        let (mut session, _dir) = session();
        session.execute("input /a/temp num celsius").unwrap();
        session.execute("obs /obs/hot").unwrap();
        session.execute("limit /obs/hot high 30").unwrap();
        session.execute("source /obs/hot /a/temp").unwrap();
        session.execute("push /a/temp num 35.0").unwrap();
        let value = session.execute("value /obs/hot").unwrap().unwrap();
        assert!(value.contains("35"));
    }

    #[test]
    fn source_on_a_not_yet_existing_path_creates_a_placeholder_first() {
        let (mut session, _dir) = session();
        session.execute("obs /obs/hot").unwrap();
        // /a/future doesn't exist as any resource yet.
        session.execute("source /obs/hot /a/future").unwrap();
        session.execute("input /a/future num celsius").unwrap();
        session.execute("push /a/future num 12.0").unwrap();
        let value = session.execute("value /obs/hot").unwrap().unwrap();
        assert!(value.contains("12"));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let (mut session, _dir) = session();
        assert!(session.execute("frobnicate /a/b").is_err());
    }

    #[test]
    fn read_streams_buffered_samples_as_json() {
        let (mut session, _dir) = session();
        session.execute("obs /obs/log").unwrap();
        session.execute("maxcount /obs/log 10").unwrap();
        session.execute("push /obs/log str a").unwrap();
        let out = session.execute("read /obs/log").unwrap().unwrap();
        assert!(out.starts_with('['));
        assert!(out.contains("\"v\":\"a\""));
    }
}

const HELP: &str = "\
commands:
  input <path> <type> <units>          create/confirm an Input
  output <path> <type> <units>         create/confirm an Output
  obs <path>                           create/confirm an Observation (under /obs/)
  source <dest> <src>                  route dest from src
  unsource <dest>                      clear dest's source
  default <path> <type> <value...>     set a default sample
  override <path> <type> <value...>    set an override sample
  clear-override <path>
  push <path> <type> <value...>        push a sample
  limit <path> high|low <value|none>   set range filter limit
  changeby <path> <value>              set changeBy
  minperiod <path> <seconds>           set minPeriod
  extract <path> <expr>                set jsonExtraction path
  maxcount <path> <n>                  set buffer capacity
  transform <path> none|mean|stddev|max|min
  backup-period <path> <seconds>
  query <path> min|max|mean|stddev <start>
  read <path> [<start>]                stream buffered samples as JSON
  value <path>                         print current value
  units <path>                         print fixed units (Input/Output only)
  delete <path>
  fence enter|leave
  help
  quit / exit
types: trigger|bool|num|str|json";
