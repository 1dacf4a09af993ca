//! Keyword-rule reply engine.
//!
//! Pure and deterministic: maps free-text input to a canned reply. This is
//! the only responder available when the network path fails, so every input
//! must produce something sensible.

/// One reply rule: the first rule whose keyword matches the input wins.
struct Rule {
    keywords: &'static [&'static str],
    reply: &'static str,
}

const WELCOME_MESSAGE: &str =
    "你好！我是AI助手，很高兴为你服务。你可以问我任何问题，或者输入\"帮助\"查看我能做什么。";

const QUESTION_HINT: &str = "这是一个好问题。虽然我没有预设的答案，但你可以尝试问我一些常见的问题，比如：\n• 你是谁？\n• 你能做什么？\n• 你好";

const TOO_SHORT_HINT: &str = "你的输入太短了，可以详细描述一下你的问题吗？";

const TOO_LONG_HINT: &str = "你的问题很详细。让我想想... 你可以尝试用更简洁的方式表达吗？";

/// Rules are checked in table order; keyword matching is a case-insensitive
/// substring test.
const RULES: &[Rule] = &[
    Rule {
        keywords: &["你好", "您好", "hello", "hi", "早上好", "下午好", "晚上好"],
        reply: "你好！很高兴和你聊天，有什么我可以帮助你的吗？",
    },
    Rule {
        keywords: &["你是谁", "你是什么", "介绍", "介绍自己"],
        reply: "我是一个AI助手，专门为你提供帮助和回答问题。",
    },
    Rule {
        keywords: &["你能做什么", "功能", "帮助", "你能帮我什么"],
        reply: "我可以回答你的问题、陪你聊天、提供建议等。你可以问我任何问题！",
    },
    Rule {
        keywords: &["天气", "今天天气", "明天天气", "下雨"],
        reply: "抱歉，我目前无法获取实时天气信息。建议你查看天气应用或询问语音助手。",
    },
    Rule {
        keywords: &["现在几点", "时间", "几点了", "现在什么时候"],
        reply: "你可以查看手机上的时间显示。",
    },
    Rule {
        keywords: &["谢谢", "感谢", "thank", "thanks"],
        reply: "不客气！很高兴能帮到你。还有其他问题吗？",
    },
    Rule {
        keywords: &["再见", "拜拜", "bye", "goodbye", "退出"],
        reply: "再见！期待下次和你聊天。",
    },
    Rule {
        keywords: &["你好吗", "怎么样", "如何"],
        reply: "我很好，谢谢关心！你呢？",
    },
    Rule {
        keywords: &["默认"],
        reply: "这是一个很有趣的问题。让我想想... 你可以换个方式问我吗？",
    },
];

/// Canned responder used to seed conversations and to answer when the
/// backend is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleResponder;

impl RuleResponder {
    pub fn new() -> Self {
        Self
    }

    /// The fixed greeting used as the sole message of a fresh conversation.
    pub fn welcome(&self) -> &'static str {
        WELCOME_MESSAGE
    }

    /// Map user input to a canned reply. First matching rule wins; inputs
    /// matching no rule get a heuristic hint instead.
    pub fn reply(&self, input: &str) -> String {
        let input = input.trim().to_lowercase();

        for rule in RULES {
            if rule
                .keywords
                .iter()
                .any(|keyword| input.contains(&keyword.to_lowercase()))
            {
                return rule.reply.to_string();
            }
        }

        Self::heuristic_reply(&input)
    }

    /// Fallback when no rule matches. Length checks count characters, not
    /// bytes; the rule set is Chinese.
    fn heuristic_reply(input: &str) -> String {
        if input.contains('?') || input.contains('？') {
            return QUESTION_HINT.to_string();
        }
        let chars = input.chars().count();
        if chars < 3 {
            return TOO_SHORT_HINT.to_string();
        }
        if chars > 100 {
            return TOO_LONG_HINT.to_string();
        }
        format!(
            "我理解你说的\"{input}\"。虽然我没有预设这个问题的答案，但我会尽力帮助你。你可以尝试问我其他问题。"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_keywords_match_case_insensitively() {
        let responder = RuleResponder::new();
        let expected = "你好！很高兴和你聊天，有什么我可以帮助你的吗？";
        assert_eq!(responder.reply("你好"), expected);
        assert_eq!(responder.reply("Hello there"), expected);
        assert_eq!(responder.reply("  HI  "), expected);
    }

    #[test]
    fn first_matching_rule_wins_in_table_order() {
        let responder = RuleResponder::new();
        // "你好吗" contains "你好", so the greeting rule fires first.
        assert_eq!(
            responder.reply("你好吗"),
            "你好！很高兴和你聊天，有什么我可以帮助你的吗？"
        );
    }

    #[test]
    fn thanks_and_farewell_have_dedicated_replies() {
        let responder = RuleResponder::new();
        assert_eq!(responder.reply("谢谢你"), "不客气！很高兴能帮到你。还有其他问题吗？");
        assert_eq!(responder.reply("bye"), "再见！期待下次和你聊天。");
    }

    #[test]
    fn question_marks_get_the_question_hint() {
        let responder = RuleResponder::new();
        assert_eq!(responder.reply("宇宙有多大？"), QUESTION_HINT);
        assert_eq!(responder.reply("what is this?"), QUESTION_HINT);
    }

    #[test]
    fn length_hints_count_characters_not_bytes() {
        let responder = RuleResponder::new();
        // Two Chinese characters are six bytes but still a short input.
        assert_eq!(responder.reply("嗯嗯"), TOO_SHORT_HINT);
        let long_input = "长".repeat(101);
        assert_eq!(responder.reply(&long_input), TOO_LONG_HINT);
    }

    #[test]
    fn unmatched_input_is_echoed_back() {
        let responder = RuleResponder::new();
        let reply = responder.reply("罗马帝国的衰落");
        assert!(reply.contains("罗马帝国的衰落"));
    }

    #[test]
    fn replies_are_deterministic() {
        let responder = RuleResponder::new();
        assert_eq!(responder.reply("天气怎么样"), responder.reply("天气怎么样"));
    }

    #[test]
    fn welcome_is_fixed() {
        assert_eq!(RuleResponder::new().welcome(), WELCOME_MESSAGE);
    }
}
