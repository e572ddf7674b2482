//! Session command parsing

use anyhow::{bail, Context, Result};
use scriptdesk_core::preferences::CONTEXT_KEY_PREFIX;

/// How a command names a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    /// 1-based position; shifts when results land above it
    Number(usize),
    /// Prefix of the block id shown after `@`; stable
    Id(String),
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Number(n) => write!(f, "{}", n),
            BlockRef::Id(prefix) => write!(f, "@{}", prefix),
        }
    }
}

/// One line of session input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text: a new request, or draft text while editing
    Text(String),
    Review(BlockRef),
    Run(BlockRef),
    Debug(BlockRef),
    Explain(BlockRef),
    Install {
        block: BlockRef,
        package: Option<String>,
    },
    Apply(BlockRef),
    Edit(BlockRef),
    Save,
    Cancel,
    Toggle(BlockRef),
    Show,
    Set {
        key: String,
        value: String,
    },
    Logs(usize),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands (N is the block number shown in brackets, or @ID with the id
shown after it, which stays valid when blocks are added):
  <text>              ask for a script, or a device answer in device chat mode
  :review N           review the code in block N
  :run N              run the code in block N
  :debug N            debug the failed execution in block N
  :explain N          explain block N
  :install N [pkg]    install the package suggested by debug result N
  :apply N            turn the corrected code of debug result N into a new block
  :edit N             edit the code in block N (type lines, then :save or :cancel)
  :save               store the edit
  :cancel             discard the edit
  :toggle N           collapse or expand the round started by block N
  :show               print the conversation
  :set KEY VALUE      change a preference
  :logs [N]           print backend log lines
  :help               show this help
  :quit               leave";

/// Parse one input line. Lines not starting with `:` are plain text.
pub fn parse(line: &str) -> Result<Input> {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix(':') else {
        return Ok(Input::Text(line.trim_end().to_string()));
    };

    let mut words = command.split_whitespace();
    let name = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();

    let input = match name {
        "review" => Input::Review(block_ref(&rest)?),
        "run" | "exec" => Input::Run(block_ref(&rest)?),
        "debug" => Input::Debug(block_ref(&rest)?),
        "explain" => Input::Explain(block_ref(&rest)?),
        "install" => Input::Install {
            block: block_ref(&rest)?,
            package: rest.get(1).map(|p| p.to_string()),
        },
        "apply" => Input::Apply(block_ref(&rest)?),
        "edit" => Input::Edit(block_ref(&rest)?),
        "save" => Input::Save,
        "cancel" => Input::Cancel,
        "toggle" => Input::Toggle(block_ref(&rest)?),
        "show" => Input::Show,
        "set" => match rest.as_slice() {
            // Context command keys contain spaces; the value is the last word.
            [first, .., value] if first.starts_with(CONTEXT_KEY_PREFIX) => Input::Set {
                key: rest[..rest.len() - 1].join(" "),
                value: value.to_string(),
            },
            [key, value @ ..] if !value.is_empty() => Input::Set {
                key: key.to_string(),
                value: value.join(" "),
            },
            _ => bail!("usage: :set KEY VALUE"),
        },
        "logs" => match rest.first() {
            Some(n) => Input::Logs(n.parse().context("usage: :logs [LINES]")?),
            None => Input::Logs(75),
        },
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => bail!("unknown command :{} (try :help)", other),
    };
    Ok(input)
}

fn block_ref(rest: &[&str]) -> Result<BlockRef> {
    let Some(word) = rest.first() else {
        bail!("missing block number");
    };
    if let Some(prefix) = word.strip_prefix('@') {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("{:?} is not a block id", word);
        }
        return Ok(BlockRef::Id(prefix.to_ascii_lowercase()));
    }
    let number: usize = word
        .trim_start_matches('#')
        .parse()
        .with_context(|| format!("{:?} is not a block number", word))?;
    if number == 0 {
        bail!("block numbers start at 1");
    }
    Ok(BlockRef::Number(number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(
            parse("list the biggest files  ").unwrap(),
            Input::Text("list the biggest files".to_string())
        );
    }

    #[test]
    fn test_block_commands() {
        assert_eq!(parse(":run 3").unwrap(), Input::Run(BlockRef::Number(3)));
        assert_eq!(parse(" :review #2").unwrap(), Input::Review(BlockRef::Number(2)));
        assert_eq!(
            parse(":install 5 requests").unwrap(),
            Input::Install {
                block: BlockRef::Number(5),
                package: Some("requests".to_string())
            }
        );
        assert_eq!(
            parse(":install 5").unwrap(),
            Input::Install {
                block: BlockRef::Number(5),
                package: None
            }
        );
    }

    #[test]
    fn test_block_ids() {
        assert_eq!(
            parse(":debug @3F2A91c0").unwrap(),
            Input::Debug(BlockRef::Id("3f2a91c0".to_string()))
        );
        assert_eq!(BlockRef::Id("3f2a".to_string()).to_string(), "@3f2a");
    }

    #[test]
    fn test_invalid_commands() {
        assert!(parse(":run").is_err());
        assert!(parse(":run zero").is_err());
        assert!(parse(":run 0").is_err());
        assert!(parse(":run @").is_err());
        assert!(parse(":run @xyz").is_err());
        assert!(parse(":frobnicate").is_err());
        assert!(parse(":set target").is_err());
    }

    #[test]
    fn test_set_keys_and_values() {
        assert_eq!(
            parse(":set context:get system status off").unwrap(),
            Input::Set {
                key: "context:get system status".to_string(),
                value: "off".to_string()
            }
        );
        assert_eq!(
            parse(":set model gemini-1.5-pro").unwrap(),
            Input::Set {
                key: "model".to_string(),
                value: "gemini-1.5-pro".to_string()
            }
        );
        assert_eq!(parse(":logs").unwrap(), Input::Logs(75));
        assert_eq!(parse(":q").unwrap(), Input::Quit);
    }
}
