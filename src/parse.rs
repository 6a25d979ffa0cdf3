//! Command-line fragment builder for stimulus files.
//!
//! A stimulus can be described on a command line as a sequence of
//! fragments, each `<waveform_name> [options] [positional params]`.
//! Fragments joined by the operators `+ - x /` and terminated by `=`
//! form a composite group whose member signals the engine combines
//! point-wise. Example (1 s of `100 + 50 sin(2 pi 10 t)`):
//!
//! ```text
//! dc -d 1 100 + sine --p1 50 --p2 10 --p3 0 --p4 0 =
//! ```
//!
//! Options:
//! - `-d`, `--duration` — row duration in seconds. Required on single
//!   rows and on the first fragment of a group; forbidden elsewhere
//!   (group members inherit the head's duration).
//! - `--p1` .. `--p5` — positional parameters by slot. Bare numbers fill
//!   the slots left to right.
//! - `-s`, `--seed` — fix the seed of a stochastic waveform.
//! - `-F`, `--fix` — fix the seed to a freshly drawn random value.
//! - `-e`, `--exponent` — elementwise exponent applied to the row.

use std::path::Path;

use regex::Regex;

use crate::error::{Error, Result};
use crate::stimulus::{append_stim, write_stim, Op, Seed, StimRow, Stimulus, Waveform};

struct Fragment {
    row: StimRow,
    had_duration: bool,
}

enum Item {
    Fragment(Fragment),
    Operator(Op),
    Close,
}

fn is_operator(token: &str) -> Option<Op> {
    match token {
        "+" => Some(Op::Plus),
        "-" => Some(Op::Minus),
        "x" => Some(Op::Times),
        "/" => Some(Op::Div),
        _ => None,
    }
}

/// Parses the token stream into fragments, operators and group closers.
fn lex(args: &[&str]) -> Result<Vec<Item>> {
    // Accepts plain and scientific decimal notation, with sign.
    let number = Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();
    let mut items = Vec::new();
    let mut pos = 0;

    while pos < args.len() {
        let token = args[pos];
        pos += 1;
        if let Some(op) = is_operator(token) {
            items.push(Item::Operator(op));
            continue;
        }
        if token == "=" {
            items.push(Item::Close);
            continue;
        }

        // Anything else must open a fragment with a waveform name.
        let name = token;
        let mut params = [0.; 5];
        let mut duration = 0.;
        let mut had_duration = false;
        let mut seed = Seed::Entropy;
        let mut exponent = 1.;
        let mut slot = 0;

        let take_value = |pos: &mut usize, option: &str| -> Result<f64> {
            let value = args.get(*pos).copied().ok_or_else(|| {
                Error::Schema(format!("option {} of '{}' is missing its value", option, name))
            })?;
            *pos += 1;
            value.parse::<f64>().map_err(|_| {
                Error::Schema(format!(
                    "option {} of '{}': '{}' is not a number",
                    option, name, value
                ))
            })
        };

        while pos < args.len() {
            let token = args[pos];
            if is_operator(token).is_some() || token == "=" {
                break;
            }
            match token {
                "-d" | "--duration" => {
                    pos += 1;
                    duration = take_value(&mut pos, "-d")?;
                    had_duration = true;
                }
                "-s" | "--seed" => {
                    pos += 1;
                    let value = take_value(&mut pos, "-s")?;
                    seed = Seed::Fixed(value as u64);
                }
                "-F" | "--fix" => {
                    pos += 1;
                    seed = Seed::random();
                }
                "-e" | "--exponent" => {
                    pos += 1;
                    exponent = take_value(&mut pos, "-e")?;
                }
                "--p1" | "--p2" | "--p3" | "--p4" | "--p5" => {
                    let index = token.as_bytes()[3] - b'1';
                    pos += 1;
                    params[index as usize] = take_value(&mut pos, token)?;
                }
                _ if number.is_match(token) => {
                    if slot >= params.len() {
                        return Err(Error::Schema(format!(
                            "fragment '{}' has more than 5 positional parameters",
                            name
                        )));
                    }
                    params[slot] = token.parse::<f64>().unwrap();
                    slot += 1;
                    pos += 1;
                }
                other => {
                    return Err(Error::Schema(format!(
                        "unexpected token '{}' in fragment '{}'",
                        other, name
                    )));
                }
            }
        }

        let waveform = Waveform::from_name(name, params)?;
        let row = StimRow {
            duration,
            waveform,
            seed,
            exponent,
        };
        items.push(Item::Fragment(Fragment { row, had_duration }));
    }
    Ok(items)
}

/// Builds a stimulus from command-line fragments and writes (or, with
/// `append`, appends) it to `out`. Returns the duration of the rows
/// written by this call.
pub fn compile_cli<S: AsRef<str>>(args: &[S], out: impl AsRef<Path>, append: bool) -> Result<f64> {
    let tokens: Vec<&str> = args.iter().map(|s| s.as_ref()).collect();
    let items = lex(&tokens)?;

    let mut stim = Stimulus::new();
    let mut group: Vec<(Op, StimRow)> = Vec::new();
    let mut pending: Option<Fragment> = None;
    let mut next_op: Option<Op> = None;

    let commit_single = |stim: &mut Stimulus, fragment: Fragment| -> Result<()> {
        if !fragment.had_duration || fragment.row.duration <= 0. {
            return Err(Error::Schema(format!(
                "waveform '{}' needs a positive duration (-d)",
                fragment.row.waveform.name()
            )));
        }
        stim.push(fragment.row);
        Ok(())
    };

    for item in items {
        match item {
            Item::Fragment(fragment) => match next_op.take() {
                Some(op) => {
                    if group.is_empty() {
                        let head = pending.take().ok_or_else(|| {
                            Error::Schema("operator with no preceding waveform".to_string())
                        })?;
                        if !head.had_duration || head.row.duration <= 0. {
                            return Err(Error::Schema(format!(
                                "first waveform of a composite group ('{}') needs a positive duration (-d)",
                                head.row.waveform.name()
                            )));
                        }
                        group.push((Op::Init, head.row));
                    }
                    group.push((op, fragment.row));
                }
                None => {
                    if !group.is_empty() {
                        return Err(Error::Schema(
                            "expected an operator or '=' after a composite-group member"
                                .to_string(),
                        ));
                    }
                    if let Some(previous) = pending.take() {
                        commit_single(&mut stim, previous)?;
                    }
                    pending = Some(fragment);
                }
            },
            Item::Operator(op) => {
                if next_op.is_some() {
                    return Err(Error::Schema(
                        "two operators specified on one fragment".to_string(),
                    ));
                }
                if pending.is_none() && group.is_empty() {
                    return Err(Error::Schema(
                        "operator with no preceding waveform".to_string(),
                    ));
                }
                next_op = Some(op);
            }
            Item::Close => {
                if next_op.is_some() {
                    return Err(Error::Schema("dangling operator before '='".to_string()));
                }
                if group.is_empty() {
                    return Err(Error::Schema(
                        "'=' does not close any composite group".to_string(),
                    ));
                }
                stim.push_group(std::mem::take(&mut group))?;
            }
        }
    }

    if next_op.is_some() {
        return Err(Error::Schema("dangling operator at end of input".to_string()));
    }
    if !group.is_empty() {
        return Err(Error::Schema(
            "composite group not closed with '='".to_string(),
        ));
    }
    if let Some(previous) = pending.take() {
        commit_single(&mut stim, previous)?;
    }
    if stim.is_empty() {
        return Err(Error::Schema("no waveform fragments given".to_string()));
    }

    if append {
        append_stim(out, &stim)
    } else {
        write_stim(out, &stim, false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn unknown_waveform_is_rejected() {
        let err = compile_cli(&args("wobble -d 1 5"), "/dev/null", false).unwrap_err();
        assert!(err.to_string().contains("wobble"));
    }

    #[test]
    fn missing_duration_is_rejected() {
        let err = compile_cli(&args("dc 100"), "/dev/null", false).unwrap_err();
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn two_operators_are_rejected() {
        let err = compile_cli(&args("dc -d 1 100 + + sine --p1 1 ="), "/dev/null", false)
            .unwrap_err();
        assert!(err.to_string().contains("two operators"));
    }

    #[test]
    fn unclosed_group_is_rejected() {
        let err =
            compile_cli(&args("dc -d 1 100 + sine --p1 1"), "/dev/null", false).unwrap_err();
        assert!(err.to_string().contains("not closed"));
    }
}
