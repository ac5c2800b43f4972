use regex::Regex;
use std::sync::OnceLock;
use tb_playlist::VideoId;

/// Recognized shapes:
///   https://www.youtube.com/watch?v=Ab_9-
///   https://music.youtube.com/watch?v=Ab_9-
///   https://youtu.be/Ab_9-
///
/// Host matching is case-insensitive and accepts any chain of subdomain
/// labels (but not a bare suffix like `notyoutube.com`); the id token is
/// case-sensitive.
fn video_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"https://(?:(?i:(?:[\w-]+\.)*youtube\.com)/\S*?\bv=|(?i:youtu\.be)/)([\w-]+)",
        )
        .expect("video url pattern compiles")
    })
}

/// Finds YouTube video ids in free text, ordered by position of the match,
/// duplicates included. Pure and total: text without references yields an
/// empty list.
pub fn extract_video_ids(text: &str) -> Vec<VideoId> {
    video_url_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|token| VideoId::new(token.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::extract_video_ids;
    use tb_playlist::VideoId;

    fn ids(text: &str) -> Vec<String> {
        extract_video_ids(text)
            .into_iter()
            .map(VideoId::into_inner)
            .collect()
    }

    #[test]
    fn text_without_references_yields_nothing() {
        assert!(ids("").is_empty());
        assert!(ids("no links here, just chatter").is_empty());
        assert!(ids("http://youtube.com/watch?v=plainhttp").is_empty());
    }

    #[test]
    fn results_preserve_source_order_and_duplicates() {
        let text = "first https://www.youtube.com/watch?v=aaa then \
                    https://youtu.be/bbb and again https://youtu.be/aaa";
        assert_eq!(ids(text), vec!["aaa", "bbb", "aaa"]);
    }

    #[test]
    fn known_url_shapes_all_match() {
        assert_eq!(ids("https://www.youtube.com/watch?v=Ab_9-"), vec!["Ab_9-"]);
        assert_eq!(ids("https://music.youtube.com/watch?v=Ab_9-"), vec!["Ab_9-"]);
        assert_eq!(ids("https://youtube.com/watch?v=Ab_9-"), vec!["Ab_9-"]);
        assert_eq!(ids("https://youtu.be/Ab_9-"), vec!["Ab_9-"]);
    }

    #[test]
    fn host_is_case_insensitive_but_token_is_not() {
        assert_eq!(ids("https://WWW.YouTube.COM/watch?v=MiXeD_9"), vec!["MiXeD_9"]);
        assert_eq!(ids("https://YOUTU.BE/MiXeD_9"), vec!["MiXeD_9"]);
    }

    #[test]
    fn lookalike_hosts_do_not_match() {
        assert!(ids("https://notyoutube.com/watch?v=abc").is_empty());
        assert!(ids("https://youtube.com.evil.example/watch?v=abc").is_empty());
    }

    #[test]
    fn token_stops_at_the_first_foreign_character() {
        assert_eq!(ids("https://www.youtube.com/watch?v=abc&t=30"), vec!["abc"]);
        assert_eq!(ids("https://youtu.be/abc?t=30"), vec!["abc"]);
    }

    #[test]
    fn query_parameter_requires_a_word_boundary() {
        // "av=" is a different parameter, not a video reference.
        assert!(ids("https://www.youtube.com/watch?av=abc").is_empty());
    }
}
