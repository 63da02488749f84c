/// Localized user-facing text for vodgrab.
/// Locale is selected via the `--locale` CLI flag (e.g. `--locale zh`).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh_cn" | "zh-hans" | "zh-tw" | "zh_tw" => Self::Zh,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub fetching_token: &'static str,
    pub fetching_playlist: &'static str,
    pub segments_found: &'static str,
    pub resumed: &'static str,
    pub nothing_to_resume: &'static str,
    pub summary_header: &'static str,
    pub status_done: &'static str,
    pub status_failed: &'static str,
    pub segments_label: &'static str,
    pub info_prefix: &'static str,
}

pub static EN: Messages = Messages {
    fetching_token: "Requesting access token",
    fetching_playlist: "Fetching playlist",
    segments_found: "segments in playlist",
    resumed: "Resumed",
    nothing_to_resume: "Nothing new to continue",
    summary_header: "Summary",
    status_done: "done",
    status_failed: "failed",
    segments_label: "segments",
    info_prefix: "INFO",
};

pub static ZH: Messages = Messages {
    fetching_token: "正在获取访问令牌",
    fetching_playlist: "正在获取播放列表",
    segments_found: "个分段",
    resumed: "已续传",
    nothing_to_resume: "没有需要续传的内容",
    summary_header: "摘要",
    status_done: "完成",
    status_failed: "失败",
    segments_label: "分段",
    info_prefix: "信息",
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Zh => &ZH,
    }
}
