#![forbid(unsafe_code)]

//! Server-rendered pages for the web player.

use mime_guess::MimeGuess;

use crate::normalize::TrackRecord;

const DEFAULT_AUDIO_TYPE: &str = "audio/mpeg";

const FORM_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            background-color: #121212;
            color: white;
            display: flex;
            align-items: center;
            justify-content: center;
            height: 100vh;
            margin: 0;
        }
        .container {
            text-align: center;
            background: #282828;
            padding: 40px;
            border-radius: 10px;
            box-shadow: 0 4px 10px rgba(0, 0, 0, 0.3);
        }
        h1 { color: #1db954; }
        input {
            padding: 10px;
            width: 250px;
            border-radius: 20px;
            border: none;
            outline: none;
        }
        button {
            padding: 10px 20px;
            margin-left: 10px;
            background: #1db954;
            color: white;
            border: none;
            border-radius: 20px;
            font-weight: bold;
            cursor: pointer;
        }
"#;

const PLAYER_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            margin: 0;
            height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            background-color: #000;
            overflow: hidden;
        }
        .bg-image {
            position: absolute;
            inset: 0;
            background-position: center;
            background-size: cover;
            filter: blur(20px) brightness(0.5);
            z-index: 1;
        }
        .player-card {
            position: relative;
            z-index: 2;
            width: 300px;
            max-width: 90%;
            padding: 30px;
            border-radius: 20px;
            text-align: center;
            color: white;
            background: rgba(0, 0, 0, 0.6);
            backdrop-filter: blur(10px);
            box-shadow: 0 10px 30px rgba(0, 0, 0, 0.5);
        }
        .album-art {
            width: 200px;
            height: 200px;
            margin: 0 auto 20px auto;
            border-radius: 10px;
            background-size: cover;
            background-position: center;
            box-shadow: 0 5px 15px rgba(0, 0, 0, 0.5);
        }
        h2 { margin: 0 0 5px 0; font-size: 1.2rem; }
        p { margin: 0 0 20px 0; color: #ccc; font-size: 0.9rem; }
        audio { width: 100%; border-radius: 30px; }
"#;

/// Escapes text for element bodies and quoted attribute values.
pub fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// An http(s) image link made safe for a quoted CSS `url('...')`. Anything
/// that does not parse as such a link yields `None`.
pub fn css_image_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let mut encoded = String::with_capacity(url.as_str().len());
    for ch in url.as_str().chars() {
        match ch {
            '\'' => encoded.push_str("%27"),
            '"' => encoded.push_str("%22"),
            '(' => encoded.push_str("%28"),
            ')' => encoded.push_str("%29"),
            '\\' => encoded.push_str("%5C"),
            other => encoded.push(other),
        }
    }
    Some(encoded)
}

/// `<source type>` for a media link, judged by the path's extension.
pub fn audio_mime(media_url: &str) -> String {
    let path = url::Url::parse(media_url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| media_url.split(['?', '#']).next().unwrap_or_default().to_string());
    MimeGuess::from_path(&path)
        .iter()
        .find(|mime| mime.type_() == mime_guess::mime::AUDIO)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_AUDIO_TYPE.to_string())
}

pub fn render_home_form() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Spotify Web Player</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{FORM_STYLE}    </style>
</head>
<body>
    <div class="container">
        <h1>Spotify Player</h1>
        <form action="/" method="get">
            <input type="text" name="url" placeholder="Paste Spotify URL..." required>
            <button type="submit">GO</button>
        </form>
    </div>
</body>
</html>
"#
    )
}

pub fn render_player(track: &TrackRecord) -> String {
    let title = html_escape(&track.title);
    let artist = html_escape(&track.artist);
    let media = html_escape(&track.media_url);
    let mime = audio_mime(&track.media_url);
    let artwork = track
        .thumbnail
        .as_deref()
        .and_then(css_image_url)
        .map(|thumb| format!(r#" style="background-image: url('{}')""#, html_escape(&thumb)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title} - {artist}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>{PLAYER_STYLE}    </style>
</head>
<body>
    <div class="bg-image"{artwork}></div>
    <div class="player-card">
        <div class="album-art"{artwork}></div>
        <h2>{title}</h2>
        <p>{artist}</p>
        <audio controls autoplay>
            <source src="{media}" type="{mime}">
            Your browser does not support the audio element.
        </audio>
    </div>
</body>
</html>
"#
    )
}

pub fn render_error(message: &str) -> String {
    format!("<h1>Error: {}</h1>", html_escape(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(media_url: &str) -> TrackRecord {
        TrackRecord {
            title: "Song <live>".into(),
            artist: "Tom & Jerry".into(),
            thumbnail: Some("https://img.example/a.jpg".into()),
            media_url: media_url.into(),
        }
    }

    #[test]
    fn home_form_submits_url_to_root() {
        let page = render_home_form();
        assert!(page.contains(r#"<form action="/" method="get">"#));
        assert!(page.contains(r#"name="url""#));
        assert!(page.contains("Spotify Player"));
    }

    #[test]
    fn player_page_escapes_and_embeds_media() {
        let page = render_player(&track("https://cdn.example/t.mp3?a=1&b=2"));
        assert!(page.contains("audio controls"));
        assert!(page.contains("bg-image"));
        assert!(page.contains("player-card"));
        assert!(page.contains("Song &lt;live&gt;"));
        assert!(page.contains("Tom &amp; Jerry"));
        assert!(page.contains(r#"src="https://cdn.example/t.mp3?a=1&amp;b=2""#));
        assert!(page.contains(r#"type="audio/mpeg""#));
        assert!(page.contains("url('https://img.example/a.jpg')"));
    }

    #[test]
    fn thumbnail_cannot_break_out_of_css_url() {
        let mut record = track("https://cdn.example/t.mp3");
        record.thumbnail = Some("https://img.example/a.jpg?x=');color:red;('".into());
        let page = render_player(&record);
        assert!(page.contains("url('https://img.example/a.jpg?x=%27%29;color:red;%28%27')"));
        assert!(!page.contains("&#39;);color"));

        assert_eq!(css_image_url("javascript:alert(1)"), None);
        assert_eq!(css_image_url("not a url"), None);
        record.thumbnail = Some("data:image/png;base64,AAAA".into());
        assert!(!render_player(&record).contains("background-image"));
    }

    #[test]
    fn player_without_thumbnail_has_no_artwork_style() {
        let mut record = track("https://cdn.example/t.mp3");
        record.thumbnail = None;
        assert!(!render_player(&record).contains("background-image: url"));
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(audio_mime("https://cdn.example/t.mp3?x=.ogg"), "audio/mpeg");
        assert_eq!(audio_mime("https://cdn.example/t.ogg"), "audio/ogg");
        assert_eq!(audio_mime("https://cdn.example/download"), "audio/mpeg");
    }

    #[test]
    fn error_fragment_is_escaped() {
        assert_eq!(render_error("Invalid Spotify URL"), "<h1>Error: Invalid Spotify URL</h1>");
        assert_eq!(render_error("<script>"), "<h1>Error: &lt;script&gt;</h1>");
    }
}
