use std::fmt;

/// Maximum length of a topic name or filter (UTF-8 encoded string limit).
const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// What a topic is about to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicUsage {
    /// topic name, wildcards are not allowed
    Publish,
    /// topic filter, `+` and `#` wildcards are allowed
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    Empty,
    TooLong(usize),
    NullCharacter,
    WildcardInTopicName,
    InvalidWildcard,
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::Empty => write!(f, "topic cannot be empty"),
            TopicError::TooLong(len) => {
                write!(f, "topic is {len} bytes long (max {MAX_TOPIC_LEN})")
            }
            TopicError::NullCharacter => write!(f, "topic cannot contain a null character"),
            TopicError::WildcardInTopicName => {
                write!(f, "wildcards are not allowed in a topic name used to publish")
            }
            TopicError::InvalidWildcard => {
                write!(f, "wildcards must occupy an entire level ('#' only as last level)")
            }
        }
    }
}

impl std::error::Error for TopicError {}

/// Check that `topic` is a valid topic name (publish) or topic filter (subscribe).
pub fn validate(topic: &str, usage: TopicUsage) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }

    match usage {
        TopicUsage::Publish => {
            if topic.contains(['+', '#']) {
                return Err(TopicError::WildcardInTopicName);
            }
        }
        TopicUsage::Subscribe => {
            let mut levels = topic.split('/').peekable();
            while let Some(level) = levels.next() {
                let is_last = levels.peek().is_none();
                match level {
                    "+" => (),
                    "#" if is_last => (),
                    _ if level.contains(['+', '#']) => return Err(TopicError::InvalidWildcard),
                    _ => (),
                }
            }
        }
    }

    Ok(())
}

/// Returns true if the topic name `topic` is matched by the topic filter `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => (),
            (Some(f), Some(t)) if f == t => (),
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        for (topic, usage, expected) in [
            ("bench/test", TopicUsage::Publish, Ok(())),
            ("bench/test", TopicUsage::Subscribe, Ok(())),
            ("", TopicUsage::Publish, Err(TopicError::Empty)),
            ("", TopicUsage::Subscribe, Err(TopicError::Empty)),
            ("a\0b", TopicUsage::Publish, Err(TopicError::NullCharacter)),
            ("bench/+", TopicUsage::Publish, Err(TopicError::WildcardInTopicName)),
            ("bench/#", TopicUsage::Publish, Err(TopicError::WildcardInTopicName)),
            ("bench/+/x", TopicUsage::Subscribe, Ok(())),
            ("bench/#", TopicUsage::Subscribe, Ok(())),
            ("#", TopicUsage::Subscribe, Ok(())),
            ("+", TopicUsage::Subscribe, Ok(())),
            ("bench/#/x", TopicUsage::Subscribe, Err(TopicError::InvalidWildcard)),
            ("bench/a+", TopicUsage::Subscribe, Err(TopicError::InvalidWildcard)),
            ("bench#", TopicUsage::Subscribe, Err(TopicError::InvalidWildcard)),
        ] {
            assert_eq!(
                validate(topic, usage),
                expected,
                "topic: '{topic}', usage: {usage:?}"
            );
        }
    }

    #[test]
    fn test_validate_topic_too_long() {
        let topic = "a".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(
            validate(&topic, TopicUsage::Publish),
            Err(TopicError::TooLong(MAX_TOPIC_LEN + 1))
        );
    }

    #[test]
    fn test_topic_matches() {
        for (filter, topic, expected) in [
            ("bench/test", "bench/test", true),
            ("bench/test", "bench/other", false),
            ("bench/+", "bench/test", true),
            ("bench/+", "bench/test/deeper", false),
            ("bench/#", "bench/test/deeper", true),
            ("bench/#", "bench", true),
            ("#", "anything/at/all", true),
            ("+/test", "bench/test", true),
            ("bench", "bench/test", false),
        ] {
            assert_eq!(
                topic_matches(filter, topic),
                expected,
                "filter: '{filter}', topic: '{topic}'"
            );
        }
    }
}
