use std::path::PathBuf;

use chat_live_sync::MessageId;

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Reply(MessageId),
    CancelReply,
    Delete(MessageId),
    Attach(PathBuf),
    Detach,
    Scroll(u32),
    Bottom,
    Dismiss,
    Invite(String),
    Accept(u64),
    Decline(u64),
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
commands:
  <text>            send a message
  /reply <id>       reply to a message
  /cancel           drop the pending reply
  /delete <id>      delete one of your messages
  /attach <path>    attach a file to the next message
  /detach           clear attached files
  /scroll <px>      pretend the list is scrolled up by <px>
  /bottom           jump to the newest message
  /dismiss          hide the new-messages banner
  /invite <user>    invite a user to this room
  /accept <id>      accept an invite
  /decline <id>     decline an invite
  /quit             leave";

pub fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    // A doubled slash escapes a message that starts with one.
    if let Some(rest) = line.strip_prefix("//") {
        return Ok(Input::Send(format!("/{rest}")));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_string()));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "reply" | "r" => number(arg, "reply").map(Input::Reply),
        "cancel" => Ok(Input::CancelReply),
        "delete" | "del" => number(arg, "delete").map(Input::Delete),
        "attach" => {
            if arg.is_empty() {
                Err("usage: /attach <path>".into())
            } else {
                Ok(Input::Attach(PathBuf::from(arg)))
            }
        }
        "detach" => Ok(Input::Detach),
        "scroll" => arg
            .parse::<u32>()
            .map(Input::Scroll)
            .map_err(|_| "usage: /scroll <px>".to_string()),
        "bottom" => Ok(Input::Bottom),
        "dismiss" => Ok(Input::Dismiss),
        "invite" => {
            if arg.is_empty() {
                Err("usage: /invite <username>".into())
            } else {
                Ok(Input::Invite(arg.to_string()))
            }
        }
        "accept" => number(arg, "accept").map(Input::Accept),
        "decline" => number(arg, "decline").map(Input::Decline),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

fn number(arg: &str, command: &str) -> Result<u64, String> {
    arg.trim_start_matches('#')
        .parse()
        .map_err(|_| format!("usage: /{command} <id>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_sent_trimmed() {
        assert_eq!(parse("  hello there \n"), Ok(Input::Send("hello there".into())));
        assert_eq!(parse("   "), Ok(Input::Empty));
    }

    #[test]
    fn double_slash_sends_literal_slash() {
        assert_eq!(parse("//shrug"), Ok(Input::Send("/shrug".into())));
    }

    #[test]
    fn ids_accept_hash_prefix() {
        assert_eq!(parse("/reply #42"), Ok(Input::Reply(42)));
        assert_eq!(parse("/delete 7"), Ok(Input::Delete(7)));
        assert_eq!(parse("/accept 3"), Ok(Input::Accept(3)));
    }

    #[test]
    fn bad_arguments_explain_usage() {
        assert_eq!(parse("/reply"), Err("usage: /reply <id>".into()));
        assert_eq!(parse("/scroll up"), Err("usage: /scroll <px>".into()));
        assert!(parse("/nope").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn attach_keeps_paths_with_spaces() {
        assert_eq!(
            parse("/attach ./my photos/cat.png"),
            Ok(Input::Attach(PathBuf::from("./my photos/cat.png")))
        );
    }
}
