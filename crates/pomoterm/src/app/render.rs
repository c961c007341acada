use crate::app::cli::{OutputFormat, ProgramConfig};
use crate::app::reply::*;
use anyhow::{Context, Result};
use minijinja::Environment;

/// Default MiniJinja template for the clock line.
pub const DEFAULT_CLOCK_TEMPLATE: &str = "{{ phase }} | {{ state }} | remaining {{ '%02d:%02d' | format(remaining_secs // 60, remaining_secs % 60) }} | {{ session_name }} | pomodoros {{ pomodoro_count }}";

/// Default MiniJinja template for the `/stats` summary.
pub const DEFAULT_STATS_TEMPLATE: &str = "Completed today: {{ completed_today }}
Total focus time: {{ focus_time }}
Current streak: {{ current_streak }} (longest {{ longest_streak }})
{%- for record in recent %}
  {{ record.timestamp[:16] }}  {{ record.sessionName }} ({{ record.durationMinutes }} min)
  {%- if record.commitMessage %}: {{ record.commitMessage }}{% endif %}
{%- endfor %}";

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const BELL: &str = "\x07";

/// Turns [`Reply`] values into what the shell prints.
pub struct Renderer {
    output: OutputFormat,
    clock_format: String,
    stats_format: String,
}

impl Renderer {
    /// A renderer for `output` using the templates from `config`.
    pub fn new(output: OutputFormat, config: &ProgramConfig) -> Self {
        Self {
            output,
            clock_format: config.clock_format.clone(),
            stats_format: config.stats_format.clone(),
        }
    }

    /// Render `reply` for printing. JSON output is a single line per reply;
    /// text output is one or more lines per event.
    pub fn render(&self, reply: &Reply) -> Result<String> {
        match self.output {
            OutputFormat::Json => serde_json::to_string(reply).context("Failed to serialize reply"),
            OutputFormat::Text => {
                let lines = reply
                    .events
                    .iter()
                    .map(|event| self.render_event(event))
                    .collect::<Result<Vec<_>>>()?;
                Ok(lines.join("\n"))
            }
        }
    }

    fn render_event(&self, event: &OutputEvent) -> Result<String> {
        let text = match event {
            OutputEvent::Info(message) | OutputEvent::Success(message) => message.clone(),
            OutputEvent::Warning(message) => format!("warning: {message}"),
            OutputEvent::Error(message) => format!("error: {message}"),
            OutputEvent::Clock(clock) => Environment::new()
                .render_str(&self.clock_format, clock)
                .context("Failed to render clock")?,
            OutputEvent::Stats(stats) => Environment::new()
                .render_str(&self.stats_format, stats)
                .context("Failed to render stats")?,
            OutputEvent::Help(entries) => {
                let mut lines = vec!["Available commands:".to_string()];
                lines.extend(
                    entries
                        .iter()
                        .map(|entry| format!("  {:<36} {}", entry.usage, entry.description)),
                );
                lines.join("\n")
            }
            OutputEvent::Clear => CLEAR_SCREEN.to_string(),
            OutputEvent::Bell => BELL.to_string(),
        };
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::*;
    use chrono::{TimeZone, Utc};

    fn renderer(output: OutputFormat) -> Renderer {
        Renderer::new(output, &ProgramConfig::default())
    }

    fn clock() -> ClockView {
        let settings = Settings::default();
        let mut timer = TimerState::fresh(&settings);
        timer.current_time = 1499;
        timer.is_running = true;
        ClockView::new(&timer, Phase::Work, &settings)
    }

    #[test]
    fn text_renders_clock_with_default_template() -> Result<()> {
        let reply = Reply::success("Focus Session started").with_event(OutputEvent::Clock(clock()));
        let output = renderer(OutputFormat::Text).render(&reply)?;
        assert_eq!(
            output,
            "Focus Session started\nFocus Session | running | remaining 24:59 | Focus Session | pomodoros 0"
        );
        Ok(())
    }

    #[test]
    fn text_renders_custom_clock_template() -> Result<()> {
        let config = ProgramConfig {
            clock_format: "{{ remaining_secs }}/{{ total_secs }}".to_string(),
            ..ProgramConfig::default()
        };
        let renderer = Renderer::new(OutputFormat::Text, &config);
        let reply = Reply::new(CommandResult::ok("clock")).with_event(OutputEvent::Clock(clock()));
        assert_eq!(renderer.render(&reply)?, "1499/1500");
        Ok(())
    }

    #[test]
    fn text_renders_stats_with_history() -> Result<()> {
        let stats = Stats {
            completed_today: 2,
            total_focus_time: 50,
            current_streak: 2,
            longest_streak: 3,
            history: vec![SessionRecord {
                session_name: "Focus Session".to_string(),
                is_break: false,
                timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap(),
                duration_minutes: 5,
                commit_message: Some("did X".to_string()),
            }],
        };
        let reply = Reply::new(CommandResult::ok("Statistics")).with_event(OutputEvent::Stats(StatsView::from(&stats)));
        let output = renderer(OutputFormat::Text).render(&reply)?;
        assert_eq!(
            output,
            "Completed today: 2\nTotal focus time: 50m\nCurrent streak: 2 (longest 3)\n  2026-10-18T09:30  Focus Session (5 min): did X"
        );
        Ok(())
    }

    #[test]
    fn text_prefixes_warnings_and_errors() -> Result<()> {
        let renderer = renderer(OutputFormat::Text);
        assert_eq!(renderer.render(&Reply::warning("careful"))?, "warning: careful");
        assert_eq!(renderer.render(&Reply::failure("broken"))?, "error: broken");
        Ok(())
    }

    #[test]
    fn text_renders_help_table() -> Result<()> {
        let reply = Reply::new(CommandResult::ok("help")).with_event(OutputEvent::Help(COMMANDS.to_vec()));
        let output = renderer(OutputFormat::Text).render(&reply)?;
        assert!(output.starts_with("Available commands:"));
        assert!(output.contains("/confirm-reset"));
        assert_eq!(output.lines().count(), COMMANDS.len() + 1);
        Ok(())
    }

    #[test]
    fn json_renders_one_line_per_reply() -> Result<()> {
        let reply = Reply::success("Timer paused").with_event(OutputEvent::Clock(clock()));
        let output = renderer(OutputFormat::Json).render(&reply)?;
        assert!(!output.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&output)?;
        assert_eq!(value["result"]["message"], "Timer paused");
        assert_eq!(value["events"][1]["data"]["remaining_secs"], 1499);
        Ok(())
    }

    #[test]
    fn broken_template_is_an_error() {
        let config = ProgramConfig {
            clock_format: "{{ unclosed".to_string(),
            ..ProgramConfig::default()
        };
        let reply = Reply::new(CommandResult::ok("clock")).with_event(OutputEvent::Clock(clock()));
        assert!(Renderer::new(OutputFormat::Text, &config).render(&reply).is_err());
    }
}
