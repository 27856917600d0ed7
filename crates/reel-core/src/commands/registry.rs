//! Static catalog of builtin commands.
//!
//! Each entry maps a short name (`/convert <file-id> --format=webm`) to an
//! ffmpeg or ffprobe command line. The input is always referenced by its file
//! id; the executor substitutes the real path later.

use serde::Serialize;

use super::{format_number, OptionMap, OptionValue};

/// Declared type of a builtin option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Number,
    Boolean,
}

/// Default carried by an [`OptionSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Text(&'static str),
    Number(f64),
    Bool(bool),
}

impl DefaultValue {
    fn render(&self) -> String {
        match self {
            DefaultValue::Text(s) => (*s).to_owned(),
            DefaultValue::Number(n) => format_number(*n),
            DefaultValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

/// Expansion function: `(input file id, resolved options) -> command text`.
pub type Expand = fn(&str, &Resolved<'_>) -> String;

#[derive(Debug, Clone, Serialize)]
pub struct BuiltinCommand {
    pub name: &'static str,
    pub description: &'static str,
    pub options: &'static [OptionSpec],
    #[serde(skip)]
    expand: Expand,
}

impl BuiltinCommand {
    pub fn option(&self, name: &str) -> Option<&'static OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Produce the command line for `input` with the user's options laid over
    /// the declared defaults.
    pub fn expand(&self, input: &str, options: &OptionMap, output: Option<&str>) -> String {
        let resolved = Resolved {
            spec: self,
            options,
            output,
        };
        (self.expand)(input, &resolved)
    }
}

/// Option view handed to an expansion function.
pub struct Resolved<'a> {
    spec: &'a BuiltinCommand,
    options: &'a OptionMap,
    output: Option<&'a str>,
}

impl Resolved<'_> {
    /// User value if given, else the declared default, else empty.
    pub fn get(&self, name: &str) -> String {
        if let Some(value) = self.options.get(name) {
            return value.to_string();
        }
        self.spec
            .option(name)
            .and_then(|o| o.default.as_ref())
            .map(DefaultValue::render)
            .unwrap_or_default()
    }

    pub fn flag(&self, name: &str) -> bool {
        match self.options.get(name) {
            Some(OptionValue::Bool(b)) => *b,
            Some(_) => false,
            None => matches!(
                self.spec.option(name).and_then(|o| o.default),
                Some(DefaultValue::Bool(true))
            ),
        }
    }

    /// Output file name: the `--output=` override, or `<stem>.<ext>`.
    /// An override without an extension gets `ext` appended.
    pub fn output(&self, stem: &str, ext: &str) -> String {
        match self.output {
            Some(name) if name.contains('.') => name.to_owned(),
            Some(name) => format!("{name}.{ext}"),
            None => format!("{stem}.{ext}"),
        }
    }
}

const fn text(name: &'static str, description: &'static str, default: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        description,
        kind: OptionKind::String,
        default: Some(DefaultValue::Text(default)),
    }
}

const fn number(name: &'static str, description: &'static str, default: f64) -> OptionSpec {
    OptionSpec {
        name,
        description,
        kind: OptionKind::Number,
        default: Some(DefaultValue::Number(default)),
    }
}

const fn boolean(name: &'static str, description: &'static str, default: bool) -> OptionSpec {
    OptionSpec {
        name,
        description,
        kind: OptionKind::Boolean,
        default: Some(DefaultValue::Bool(default)),
    }
}

static BUILTINS: &[BuiltinCommand] = &[
    BuiltinCommand {
        name: "convert",
        description: "Convert a media file to another container format",
        options: &[text("format", "Target container / extension", "mp4")],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -i \"{input}\" {}",
                o.output("converted", &o.get("format"))
            )
        },
    },
    BuiltinCommand {
        name: "extract-audio",
        description: "Extract the audio track of a video",
        options: &[
            text("format", "Audio format / extension", "mp3"),
            text("bitrate", "Audio bitrate", "192k"),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -i \"{input}\" -vn -b:a {} {}",
                o.get("bitrate"),
                o.output("audio", &o.get("format"))
            )
        },
    },
    BuiltinCommand {
        name: "compress",
        description: "Re-encode a video with H.264 at a given quality",
        options: &[
            number("crf", "Constant rate factor (0-51, lower is better)", 28.0),
            text("preset", "x264 speed preset", "medium"),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -i \"{input}\" -c:v libx264 -crf {} -preset {} -c:a aac -b:a 128k {}",
                o.get("crf"),
                o.get("preset"),
                o.output("compressed", "mp4")
            )
        },
    },
    BuiltinCommand {
        name: "trim",
        description: "Cut a segment without re-encoding",
        options: &[
            text("start", "Start position (HH:MM:SS or seconds)", "00:00:00"),
            number("duration", "Segment length in seconds", 10.0),
            text("format", "Output container / extension", "mp4"),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -ss {} -i \"{input}\" -t {} -c copy {}",
                o.get("start"),
                o.get("duration"),
                o.output("trimmed", &o.get("format"))
            )
        },
    },
    BuiltinCommand {
        name: "resize",
        description: "Scale a video to a new width",
        options: &[
            number("width", "Target width in pixels", 1280.0),
            number("height", "Target height in pixels (-2 keeps aspect)", -2.0),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -i \"{input}\" -vf scale={}:{} -c:a copy {}",
                o.get("width"),
                o.get("height"),
                o.output("resized", "mp4")
            )
        },
    },
    BuiltinCommand {
        name: "gif",
        description: "Render a segment of a video as an animated GIF",
        options: &[
            number("fps", "Frames per second", 10.0),
            number("width", "Output width in pixels", 480.0),
            text("start", "Start position (HH:MM:SS or seconds)", "0"),
            number("duration", "Segment length in seconds", 5.0),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -ss {} -t {} -i \"{input}\" -vf \"fps={},scale={}:-1:flags=lanczos\" -loop 0 {}",
                o.get("start"),
                o.get("duration"),
                o.get("fps"),
                o.get("width"),
                o.output("animation", "gif")
            )
        },
    },
    BuiltinCommand {
        name: "thumbnail",
        description: "Grab a single frame as a JPEG",
        options: &[
            text("time", "Frame position (HH:MM:SS or seconds)", "00:00:01"),
            number("width", "Output width in pixels", 640.0),
        ],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -ss {} -i \"{input}\" -frames:v 1 -vf scale={}:-2 {}",
                o.get("time"),
                o.get("width"),
                o.output("thumbnail", "jpg")
            )
        },
    },
    BuiltinCommand {
        name: "mute",
        description: "Drop the audio track of a video",
        options: &[],
        expand: |input, o| {
            format!(
                "ffmpeg -hide_banner -y -i \"{input}\" -c:v copy -an {}",
                o.output("muted", "mp4")
            )
        },
    },
    BuiltinCommand {
        name: "probe",
        description: "Write stream and container metadata as JSON",
        options: &[boolean("frames", "Include per-frame information", false)],
        expand: |input, o| {
            let frames = if o.flag("frames") { " -show_frames" } else { "" };
            format!(
                "ffprobe -v quiet -print_format json -show_format -show_streams{frames} \"{input}\" > {}",
                o.output("probe", "json")
            )
        },
    },
];

/// All builtins, in catalog order.
pub fn builtins() -> &'static [BuiltinCommand] {
    BUILTINS
}

pub fn builtin(name: &str) -> Option<&'static BuiltinCommand> {
    BUILTINS.iter().find(|b| b.name == name)
}
