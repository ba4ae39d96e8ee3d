//! Pattern Matcher - recognizes server events inside parsed log records
//!
//! Rules form a static, ordered table. Every rule runs on every record, so a
//! single line may produce several events. Rules are pure except for the
//! join/leave rules, which update the roster as they emit.
//!
//! In-game administrative lines share one grammar: either `[actor: inner]`
//! (issued by a player or command block) or a bare `inner` (issued from the
//! console). The record is split into `(actor, inner)` once and all inner
//! rules are tried against it.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::events::{GameEvent, Location};
use crate::parser::LogRecord;
use crate::supervisor::roster::Roster;

const SERVER_THREAD: &str = "Server thread";
const AUTHENTICATOR_PREFIX: &str = "User Authenticator #";

struct Patterns {
    version: Regex,
    done: Regex,
    join: Regex,
    leave: Regex,
    bind: Regex,
    authenticate: Regex,
    message: Regex,
    kill: Regex,
    bracketed: Regex,
    ban: Regex,
    unban: Regex,
    op: Regex,
    deop: Regex,
    score: Regex,
    experience: Regex,
    teleport: Regex,
    spawnpoint: Regex,
    stopping: Regex,
    formatting: Regex,
}

impl Patterns {
    fn get() -> &'static Patterns {
        static PATTERNS: OnceLock<Patterns> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            let re = |pat: &str| Regex::new(pat).expect("built-in console pattern");
            Patterns {
                version: re(r"^Starting minecraft server version ([.0-9a-zA-Z]+)$"),
                done: re(r"^Done \([.,0-9a-zA-Z]+\)!"),
                join: re(r"^(\w+) ?(\[(.+)\] )?logged in with entity id (\d+) at \(([\d\s\-.,]+)\)$"),
                leave: re(r"^(\w+) lost connection: (.+)$"),
                bind: re(r"^\*+ FAILED TO BIND TO PORT!$"),
                authenticate: re(r"^UUID of player (\w+) is (.+)$"),
                message: re(r"^<(.+?)>\s(.+)$"),
                kill: re(r"^([^<]+) (was slain by|was shot by|was killed by) (.+?)( using \[([^\]]+)\])?$"),
                bracketed: re(r"^\[([\w@]+): (.+)\]$"),
                ban: re(r"^Banned player (\w+)$"),
                unban: re(r"^Unbanned player (\w+)$"),
                op: re(r"^Opped (\w+)$"),
                deop: re(r"^De-opped (\w+)$"),
                score: re(r"^Set score of (\w+) for player (\w+) to (-?\d+)$"),
                experience: re(r"^Given (\d+) (experience|levels) to (\w+)$"),
                teleport: re(r"^Teleported (\w+) to (.+)$"),
                spawnpoint: re(r"^Set (\w+)'s spawn point to \((-?\d+), (-?\d+), (-?\d+)\)$"),
                stopping: re(r"^Stopping the server$"),
                formatting: re(r"§[0-9a-fk-or]"),
            }
        })
    }
}

type Rule = fn(&Patterns, &LogRecord, &mut Roster, &mut Vec<GameEvent>);

/// Evaluated in this order for every record.
const RULES: &[(&str, Rule)] = &[
    ("version", version),
    ("authenticated", authenticated),
    ("joined", joined),
    ("left", left),
    ("in_game", in_game),
    ("killed", killed),
    ("message", message),
    ("error", error),
    ("bind_failure", bind_failure),
    ("started", started),
    ("save_state", save_state),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct PatternMatcher;

impl PatternMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Run every rule over `record`, returning events in rule order.
    pub fn apply(&self, record: &LogRecord, roster: &mut Roster) -> Vec<GameEvent> {
        let patterns = Patterns::get();
        let mut events = Vec::new();
        for (name, rule) in RULES {
            let before = events.len();
            rule(patterns, record, roster, &mut events);
            if events.len() > before {
                tracing::trace!("Rule '{}' matched: {}", name, record.text);
            }
        }
        events
    }
}

// ─── Server info ─────────────────────────────────────────────

fn version(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    if let Some(caps) = p.version.captures(&record.text) {
        out.push(GameEvent::VersionDetected {
            version: caps[1].to_string(),
        });
    }
}

fn started(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    if p.done.is_match(&record.text) {
        out.push(GameEvent::Started);
    }
}

fn save_state(_: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    match record.text.as_str() {
        "Turned off world auto-saving" => out.push(GameEvent::SaveOff),
        "Turned on world auto-saving" => out.push(GameEvent::SaveOn),
        "Saved the world" => out.push(GameEvent::Saved),
        _ => {}
    }
}

// ─── Fatal lines ─────────────────────────────────────────────

fn error(_: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    if record.level_is("ERROR") {
        out.push(GameEvent::Error {
            message: record.text.clone(),
        });
    }
}

fn bind_failure(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    let warning = record.level_is("WARNING") || record.level_is("WARN");
    if warning && p.bind.is_match(&record.text) {
        out.push(GameEvent::Error {
            message: record.text.clone(),
        });
    }
}

// ─── Players ─────────────────────────────────────────────────

fn authenticated(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    let from_authenticator = record
        .source
        .as_deref()
        .is_some_and(|s| s.starts_with(AUTHENTICATOR_PREFIX));
    if !from_authenticator {
        return;
    }
    if let Some(caps) = p.authenticate.captures(&record.text) {
        out.push(GameEvent::Authenticated {
            player: caps[1].to_string(),
            uuid: caps[2].to_string(),
        });
    }
}

fn joined(p: &Patterns, record: &LogRecord, roster: &mut Roster, out: &mut Vec<GameEvent>) {
    let Some(caps) = p.join.captures(&record.text) else {
        return;
    };
    let Ok(entity_id) = caps[4].parse::<u32>() else {
        return;
    };
    let Some(location) = parse_location(&caps[5]) else {
        tracing::debug!("Ignoring join line with malformed location: {}", record.text);
        return;
    };

    let player = caps[1].to_string();
    roster.join(&player);
    out.push(GameEvent::Joined {
        player,
        source: caps.get(3).map(|m| m.as_str().to_string()),
        entity_id,
        location,
    });
}

fn left(p: &Patterns, record: &LogRecord, roster: &mut Roster, out: &mut Vec<GameEvent>) {
    if let Some(caps) = p.leave.captures(&record.text) {
        let player = caps[1].to_string();
        roster.leave(&player);
        out.push(GameEvent::Left {
            player,
            reason: caps[2].to_string(),
        });
    }
}

fn killed(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    if let Some(caps) = p.kill.captures(&record.text) {
        out.push(GameEvent::Killed {
            victim: caps[1].to_string(),
            killer: caps[3].to_string(),
            weapon: caps.get(5).map(|m| m.as_str().to_string()),
        });
    }
}

fn message(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    if !(record.level_is("INFO") && record.source_is(SERVER_THREAD)) {
        return;
    }
    if let Some(caps) = p.message.captures(&record.text) {
        out.push(GameEvent::Message {
            player: p.formatting.replace_all(&caps[1], "").into_owned(),
            text: caps[2].to_string(),
        });
    }
}

fn parse_location(raw: &str) -> Option<Location> {
    let mut coords = raw.split(',').map(|c| c.trim().parse::<f64>());
    let x = coords.next()?.ok()?;
    let y = coords.next()?.ok()?;
    let z = coords.next()?.ok()?;
    Some(Location { x, y, z })
}

// ─── In-game (bracketed) events ──────────────────────────────

/// Split `[actor: inner]` into its parts; bare text has no actor.
fn split_actor<'a>(p: &Patterns, text: &'a str) -> (Option<&'a str>, &'a str) {
    match p.bracketed.captures(text) {
        Some(caps) => {
            let actor = caps.get(1).map(|m| m.as_str());
            let inner = caps.get(2).map_or(text, |m| m.as_str());
            (actor, inner)
        }
        None => (None, text),
    }
}

type InnerRule = fn(&Patterns, Option<&str>, &str) -> Option<GameEvent>;

const IN_GAME_RULES: &[InnerRule] = &[
    banned,
    unbanned,
    opped,
    deopped,
    scored,
    experience,
    teleported,
    spawn_point,
    stopping,
];

fn in_game(p: &Patterns, record: &LogRecord, _: &mut Roster, out: &mut Vec<GameEvent>) {
    let (actor, inner) = split_actor(p, &record.text);
    // all inner rules run; they are not assumed to be exclusive
    out.extend(IN_GAME_RULES.iter().filter_map(|rule| rule(p, actor, inner)));
}

fn owned(actor: Option<&str>) -> Option<String> {
    actor.map(str::to_string)
}

fn player_action(
    re: &Regex,
    inner: &str,
    build: impl FnOnce(String) -> GameEvent,
) -> Option<GameEvent> {
    re.captures(inner).map(|caps| build(caps[1].to_string()))
}

fn banned(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    player_action(&p.ban, inner, |player| GameEvent::Banned {
        actor: owned(actor),
        player,
    })
}

fn unbanned(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    player_action(&p.unban, inner, |player| GameEvent::Unbanned {
        actor: owned(actor),
        player,
    })
}

fn opped(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    player_action(&p.op, inner, |player| GameEvent::Opped {
        actor: owned(actor),
        player,
    })
}

fn deopped(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    player_action(&p.deop, inner, |player| GameEvent::Deopped {
        actor: owned(actor),
        player,
    })
}

fn scored(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    let caps = p.score.captures(inner)?;
    Some(GameEvent::Scored {
        actor: owned(actor),
        player: caps[2].to_string(),
        objective: caps[1].to_string(),
        score: parse_num(&caps, 3)?,
    })
}

fn experience(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    let caps = p.experience.captures(inner)?;
    Some(GameEvent::ExperienceGiven {
        actor: owned(actor),
        player: caps[3].to_string(),
        amount: parse_num(&caps, 1)?,
        levels: &caps[2] == "levels",
    })
}

fn teleported(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    let caps = p.teleport.captures(inner)?;
    Some(GameEvent::Teleported {
        actor: owned(actor),
        player: caps[1].to_string(),
        target: caps[2].to_string(),
    })
}

fn spawn_point(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    let caps = p.spawnpoint.captures(inner)?;
    Some(GameEvent::SpawnPointSet {
        actor: owned(actor),
        player: caps[1].to_string(),
        x: parse_num(&caps, 2)?,
        y: parse_num(&caps, 3)?,
        z: parse_num(&caps, 4)?,
    })
}

fn stopping(p: &Patterns, actor: Option<&str>, inner: &str) -> Option<GameEvent> {
    p.stopping.is_match(inner).then(|| GameEvent::Stopping {
        actor: owned(actor),
    })
}

fn parse_num<T: std::str::FromStr>(caps: &Captures<'_>, group: usize) -> Option<T> {
    caps.get(group)?.as_str().parse().ok()
}
