use std::borrow::Cow;

/// Trim trailing padding from a UID, without reallocating if possible.
pub(crate) fn trim_uid(uid: Cow<'_, str>) -> Cow<'_, str> {
    if uid.ends_with(|c| c == ' ' || c == '\0') {
        Cow::Owned(
            uid.trim_end_matches(|c| c == ' ' || c == '\0')
                .to_string(),
        )
    } else {
        uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_only_when_padded() {
        assert_eq!(trim_uid("1.2.840.10008.1.1".into()), "1.2.840.10008.1.1");
        assert_eq!(trim_uid("1.2.840.10008.1.1\0".into()), "1.2.840.10008.1.1");
        assert_eq!(trim_uid("1.2.840.10008.1.1 ".into()), "1.2.840.10008.1.1");
    }
}
