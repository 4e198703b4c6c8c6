//! Message-shape adaptation for backends without a system role.

use careline_core::{ChatTurn, Role};

/// Adapt turns to what the backend accepts.
///
/// When `supports_system_role` is false, every system turn is removed and its
/// text is prepended to the first user turn (or becomes a user turn if there
/// is none). Relative order of the remaining turns is preserved.
pub fn adapt_turns(turns: &[ChatTurn], supports_system_role: bool) -> Vec<ChatTurn> {
    if supports_system_role {
        return turns.to_vec();
    }

    let instructions: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::System)
        .map(|t| t.content.as_str())
        .collect();

    let mut out: Vec<ChatTurn> = turns
        .iter()
        .filter(|t| t.role != Role::System)
        .cloned()
        .collect();

    if instructions.is_empty() {
        return out;
    }

    let preamble = instructions.join("\n\n");
    match out.iter_mut().find(|t| t.role == Role::User) {
        Some(first_user) => {
            first_user.content = format!("{preamble}\n\n{}", first_user.content);
        }
        None => out.insert(0, ChatTurn::user(preamble)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_supported() {
        let turns = vec![ChatTurn::system("s"), ChatTurn::user("u")];
        assert_eq!(adapt_turns(&turns, true), turns);
    }

    #[test]
    fn folds_into_first_user_turn() {
        let turns = vec![
            ChatTurn::system("Gunakan bahasa Indonesia."),
            ChatTurn::assistant("Halo!"),
            ChatTurn::user("sudah minum obat"),
            ChatTurn::user("terima kasih"),
        ];
        let out = adapt_turns(&turns, false);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::Assistant);
        assert_eq!(
            out[1].content,
            "Gunakan bahasa Indonesia.\n\nsudah minum obat"
        );
        assert_eq!(out[2].content, "terima kasih");
        assert!(out.iter().all(|t| t.role != Role::System));
    }

    #[test]
    fn system_only_becomes_user() {
        let out = adapt_turns(&[ChatTurn::system("a"), ChatTurn::system("b")], false);
        assert_eq!(out, vec![ChatTurn::user("a\n\nb")]);
    }
}
