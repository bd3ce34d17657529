//! Extension and ignore filtering
//!
//! Decides whether a path is eligible for backup. The decision is purely
//! lexical so the same filter can run on the notification thread, inside the
//! workers and during tree walks without touching the filesystem.
//!
//! A path is accepted when:
//!
//! - its file name carries an extension from the allow-list (single part such
//!   as `jpg` or two parts such as `tar.gz`), compared case-insensitively;
//! - it matches the configured prefix allow-list, unless the list is empty or
//!   contains `*`;
//! - none of its directories below the watch root is hidden (starts with `.`).
//!
//! Hidden directories are judged on the root-relative path only, so a watch
//! root that itself lives below a hidden directory is still mirrored.

use crate::error::Result;
use crate::types::IngestKind;
use regex::Regex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Extensions eligible for backup, grouped by family
///
/// Entries are lowercase and the filter matches names case-insensitively.
const ALLOWED_EXTENSIONS: &[&str] = &[
    // video
    "trec", "arf", "m4v", "mts", "3gp", "mkv", "flv", "swf", "rm", "mp4", "mov", "wmv", "rmvb",
    "divx", "mpeg", "mpg", "avi",
    // audio
    "aif", "ape", "ra", "m4a", "aac", "wma", "aiff", "au", "mpc", "flac", "wav", "mp3", "ogg",
    // executables and packages
    "apk", "jar", "exec", "osx", "ps1", "sh", "bat", "cmd", "app", "dmg", "pkg", "rpm", "deb",
    "msp", "ocx", "cpl", "sys", "drv", "com", "msi", "dll", "exe",
    // image
    "jpeg", "psp", "tiff", "tga", "cr2", "psd", "ico", "sct", "pxr", "pct", "pic", "raw", "jpe",
    "tif", "png", "bmp", "jpg", "gif",
    // document
    "maf", "mpt", "xltx", "pptm", "ott", "ots", "otp", "txt", "pptx", "mat", "mar", "maq", "oti",
    "otf", "otg", "otc", "vdx", "ppt", "vssm", "xlsm", "xls", "vsdx", "xlt", "xts", "xlsx", "rtf",
    "ppl", "doc", "mam", "vsdm", "oft", "slk", "ppsm", "xps", "vtx", "odb", "dif", "docm", "onetoc",
    "xsn", "and", "docx", "xltm", "one", "pot", "thmx", "vsd", "oth", "vsl", "vsw", "vst", "vss",
    "vsx", "adp", "accdr", "accdt", "odf", "accdb", "accde", "ppam", "potm", "odm", "odi", "dot",
    "odg", "sldm", "dotm", "odc", "msg", "vssx", "dotx", "odt", "ods", "odp", "sldx", "mdt", "mdw",
    "vstm", "onetoc2", "pub", "mde", "mdf", "vstx", "mda", "mdb", "potx", "tsv", "pdf",
    // compressed
    "zip", "rar", "iso", "cab", "arj", "lzh", "ace", "tar", "gzip", "uue", "bz2", "tar.gz",
    "tar.bz2", "7z", "zipx", "lz",
    // email
    "emlx", "eml", "msf", "mbox", "mbx", "nsf", "dbw", "dbx", "pst",
    // source code, markup and build files
    "abap", "asc", "ash", "ampl", "mod", "g4", "apib", "apl", "dyalog", "asp", "asax", "ascx",
    "ashx", "asmx", "aspx", "axd", "dats", "hats", "sats", "as", "adb", "ada", "ads", "agda", "als",
    "apacheconf", "vhost", "cls", "applescript", "scpt", "arc", "ino", "asciidoc", "adoc", "aj",
    "asm", "a51", "inc", "nasm", "aug", "ahk", "ahkl", "au3", "awk", "auk", "gawk", "mawk", "nawk",
    "befunge", "bison", "bb", "decls", "bmx", "bsv", "boo", "b", "bf", "brs", "bro", "c", "cats",
    "h", "idc", "w", "cs", "cake", "cshtml", "csx", "cpp", "c++", "cc", "cp", "cxx", "h++", "hh",
    "hpp", "hxx", "inl", "ipp", "tcc", "tpp", "c-objdump", "chs", "clp", "cmake", "cmake.in", "cob",
    "cbl", "ccp", "cobol", "cpy", "css", "csv", "capnp", "mss", "ceylon", "chpl", "ch", "ck",
    "cirru", "clw", "icl", "dcl", "click", "clj", "boot", "cl2", "cljc", "cljs", "cljs.hl",
    "cljscm", "cljx", "hic", "coffee", "_coffee", "cjsx", "cson", "iced", "cfm", "cfml", "cfc",
    "lisp", "asd", "cl", "l", "lsp", "ny", "podsl", "sexp", "cps", "coq", "v", "cppobjdump",
    "c++-objdump", "c++objdump", "cpp-objdump", "cxx-objdump", "creole", "cr", "feature", "cu",
    "cuh", "cy", "pyx", "pxd", "pxi", "d", "di", "d-objdump", "dm", "zone", "arpa", "darcspatch",
    "dpatch", "dart", "diff", "patch", "dockerfile", "djs", "dylan", "dyl", "intr", "lid", "e",
    "ecl", "eclxml", "sch", "brd", "epj", "ex", "exs", "elm", "el", "emacs", "emacs.desktop", "em",
    "emberscript", "erl", "es", "escript", "hrl", "xrl", "yrl", "fs", "fsi", "fsx", "fx", "flux",
    "f90", "f", "f03", "f08", "f77", "f95", "for", "fpp", "factor", "fy", "fancypack", "fan",
    "eam.fs", "fth", "4th", "forth", "fr", "frt", "ftl", "g", "gco", "gcode", "gms", "gap", "gd",
    "gi", "tst", "s", "ms", "glsl", "fp", "frag", "frg", "fsh", "fshader", "geo", "geom", "glslv",
    "gshader", "shader", "vert", "vrx", "vsh", "vshader", "gml", "kid", "ebuild", "eclass", "po",
    "glf", "gp", "gnu", "gnuplot", "plot", "plt", "go", "golo", "gs", "gst", "gsx", "vark", "grace",
    "gradle", "gf", "graphql", "gv", "man", "1", "1in", "1m", "1x", "2", "3", "3in", "3m", "3qt",
    "3x", "4", "5", "6", "7", "8", "9", "me", "n", "rno", "roff", "groovy", "grt", "gtpl", "gvy",
    "gsp", "hcl", "tf", "hlsl", "fxh", "hlsli", "html", "htm", "html.hl", "st", "xht", "xhtml",
    "mustache", "jinja", "eex", "erb", "erb.deface", "phtml", "http", "php", "haml", "haml.deface",
    "handlebars", "hbs", "hb", "hs", "hsc", "hx", "hxsl", "hy", "pro", "dlm", "ipf", "ini", "cfg",
    "prefs", "properties", "irclog", "weechatlog", "idr", "lidr", "ni", "i7x", "iss", "io", "ik",
    "thy", "ijs", "flex", "jflex", "json", "geojson", "lock", "topojson", "json5", "jsonld", "jq",
    "jsx", "jade", "j", "java", "jsp", "js", "_js", "bones", "es6", "jake", "jsb", "jscad", "jsfl",
    "jsm", "jss", "njs", "pac", "sjs", "ssjs", "sublime-build", "sublime-commands",
    "sublime-completions", "sublime-keymap", "sublime-macro", "sublime-menu", "sublime-mousemap",
    "sublime-project", "sublime-settings", "sublime-theme", "sublime-workspace", "sublime_metrics",
    "sublime_session", "xsjs", "xsjslib", "jl", "ipynb", "krl", "kicad_pcb", "kit", "kt", "ktm",
    "kts", "lfe", "ll", "lol", "lsl", "lslp", "lvproj", "lasso", "las", "lasso8", "lasso9", "ldml",
    "latte", "lean", "hlean", "less", "lex", "ly", "ily", "m", "ld", "lds", "liquid", "lagda",
    "litcoffee", "lhs", "ls", "_ls", "xm", "x", "xi", "lgt", "logtalk", "lookml", "lua", "fcgi",
    "nse", "pd_lua", "rbxs", "wlua", "mumps", "m4", "mcr", "mtml", "muf", "mak", "mk", "mkfile",
    "mako", "mao", "md", "markdown", "mkd", "mkdn", "mkdown", "ron", "mask", "mathematica", "cdf",
    "ma", "mt", "nb", "nbp", "wl", "wlt", "matlab", "maxpat", "maxhelp", "maxproj", "mxt", "pat",
    "mediawiki", "wiki", "moo", "metal", "minid", "druby", "duby", "mir", "mirah", "mo", "mms",
    "mmk", "monkey", "moon", "myt", "ncl", "nl", "nsi", "nsh", "axs", "axi", "axs.erb", "axi.erb",
    "nlogo", "nginxconf", "nim", "nimrod", "ninja", "nit", "nix", "nu", "numpy", "numpyw", "numsc",
    "ml", "eliom", "eliomi", "ml4", "mli", "mll", "mly", "objdump", "mm", "sj", "omgrofl", "opa",
    "opal", "opencl", "p", "scad", "org", "ox", "oxh", "oxo", "oxygene", "oz", "pwn", "aw", "ctp",
    "php3", "php4", "php5", "phps", "phpt", "pls", "pck", "pkb", "pks", "plb", "plsql", "sql",
    "pov", "pan", "psc", "parrot", "pasm", "pir", "pas", "dfm", "dpr", "lpr", "pp", "pl", "al",
    "cgi", "perl", "ph", "plx", "pm", "pod", "psgi", "t", "6pl", "6pm", "nqp", "p6", "p6l", "p6m",
    "pl6", "pm6", "pkl", "pig", "pike", "pmod", "pogo", "pony", "ps", "eps", "psd1", "psm1", "pde",
    "prolog", "yap", "spin", "proto", "pd", "pb", "pbi", "purs", "py", "bzl", "gyp", "lmi", "pyde",
    "pyp", "pyt", "pyw", "rpy", "tac", "wsgi", "xpy", "pytb", "qml", "qbs", "pri", "r", "rd", "rsx",
    "raml", "rdoc", "rbbas", "rbfrm", "rbmnu", "rbres", "rbtbar", "rbuistate", "rhtml", "rmd",
    "rkt", "rktd", "rktl", "scrbl", "rl", "reb", "r2", "r3", "rebol", "red", "reds", "cw", "rs",
    "rsh", "robot", "rg", "rb", "builder", "gemspec", "god", "irbrc", "jbuilder", "mspec",
    "pluginspec", "podspec", "rabl", "rake", "rbuild", "rbw", "rbx", "ru", "ruby", "thor", "watchr",
    "rs.in", "sas", "scss", "smt2", "smt", "sparql", "rq", "sqf", "hqf", "cql", "ddl", "prc", "tab",
    "udf", "viw", "db2", "ston", "svg", "sage", "sagews", "sls", "sass", "scala", "sbt", "sc",
    "scaml", "scm", "sld", "sps", "ss", "sci", "sce", "self", "bash", "bats", "command", "ksh",
    "sh.in", "tmux", "tool", "zsh", "sh-session", "shen", "sl", "slim", "smali", "tpl", "sp", "sma",
    "nut", "stan", "fun", "sig", "sml", "do", "ado", "doh", "ihlp", "mata", "matah", "sthlp",
    "styl", "scd", "swift", "sv", "svh", "vh", "toml", "txl", "tcl", "tm", "tcsh", "csh", "tex",
    "aux", "bbx", "bib", "cbx", "dtx", "ins", "lbx", "ltx", "mkii", "mkiv", "mkvi", "sty", "toc",
    "tea", "no", "textile", "thrift", "tu", "ttl", "twig", "ts", "tsx", "upc", "anim", "asset",
    "meta", "prefab", "unity", "uno", "uc", "ur", "urs", "vcl", "vhdl", "vhd", "vhf", "vhi", "vho",
    "vhs", "vht", "vhw", "vala", "vapi", "veo", "vim", "vb", "bas", "frm", "frx", "vba", "vbhtml",
    "vbs", "volt", "vue", "owl", "webidl", "x10", "xc", "xml", "ant", "axml", "ccxml", "clixml",
    "cproject", "csl", "csproj", "ct", "dita", "ditamap", "ditaval", "dll.config", "dotsettings",
    "filters", "fsproj", "fxml", "glade", "grxml", "iml", "ivy", "jelly", "jsproj", "kml", "launch",
    "mdpolicy", "mxml", "nproj", "nuspec", "odd", "osm", "plist", "props", "ps1xml", "psc1", "pt",
    "rdf", "rss", "scxml", "srdf", "storyboard", "sttheme", "sublime-snippet", "targets",
    "tmcommand", "tml", "tmlanguage", "tmpreferences", "tmsnippet", "tmtheme", "ui", "urdf", "ux",
    "vbproj", "vcxproj", "vssettings", "vxml", "wsdl", "wsf", "wxi", "wxl", "wxs", "x3d", "xacro",
    "xaml", "xib", "xlf", "xliff", "xmi", "xml.dist", "xproj", "xsd", "xul", "zcml", "xsp-config",
    "xsp.metadata", "xpl", "xproc", "xquery", "xq", "xql", "xqm", "xqy", "xs", "xslt", "xsl",
    "xojo_code", "xojo_menu", "xojo_report", "xojo_script", "xojo_toolbar", "xojo_window", "xtend",
    "yml", "reek", "rviz", "sublime-syntax", "syntax", "yaml", "yaml-tmlanguage", "yang", "y",
    "yacc", "yy", "zep", "zimpl", "zmpl", "zpl", "desktop", "desktop.in", "ec", "eh", "edn", "fish",
    "mu", "nc", "ooc", "rst", "rest", "rest.txt", "rst.txt", "wisp", "prg", "prw", "conf", "shtml",
    "mhtml", "mht", "tmpl",
    // formats newer than the lists above
    "heic", "webp", "epub", "pages", "pps", "gz", "tgz", "xz",
];

/// Remove one trailing `~` from a path's file name
///
/// Editors save through `name~` temporary files; the event is attributed to
/// the settled name instead.
pub fn strip_temp_marker(path: &Path) -> PathBuf {
    let raw = path.as_os_str().to_string_lossy();
    match raw.strip_suffix('~') {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => path.to_path_buf(),
    }
}

/// Whether a path component names a hidden entry
pub(crate) fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Classifies paths as eligible/ineligible and image/generic
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: HashSet<&'static str>,
    prefixes: Vec<String>,
    image: Regex,
    jpeg: Regex,
}

impl ExtensionFilter {
    /// Build a filter from the configured prefix allow-list
    pub fn new(prefixes: &[String]) -> Result<Self> {
        let prefixes = if prefixes.iter().any(|p| p == "*") {
            Vec::new()
        } else {
            prefixes
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect()
        };

        Ok(Self {
            extensions: ALLOWED_EXTENSIONS.iter().copied().collect(),
            prefixes,
            image: Regex::new(r"(?i)\.(jpe?g|png)$")?,
            jpeg: Regex::new(r"(?i)\.jpe?g$")?,
        })
    }

    /// Whether a root-relative path may be backed up
    pub fn accepts_relative(&self, relative: &Path) -> bool {
        !Self::is_hidden_relative(relative) && self.accepts(relative)
    }

    /// Whether the file name may be backed up
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_lowercase();

        if !self.prefixes.is_empty() && !self.prefixes.iter().any(|p| name.starts_with(p)) {
            return false;
        }

        self.has_allowed_extension(&name)
    }

    fn has_allowed_extension(&self, name: &str) -> bool {
        // Leading dot of hidden files is not an extension separator
        let stem_start = usize::from(name.starts_with('.'));
        let parts: Vec<&str> = name[stem_start..].split('.').collect();
        if parts.len() < 2 {
            return false;
        }

        let last = parts[parts.len() - 1];
        if self.extensions.contains(last) {
            return true;
        }
        if parts.len() >= 3 {
            let double = format!("{}.{}", parts[parts.len() - 2], last);
            return self.extensions.contains(double.as_str());
        }
        false
    }

    /// Whether any directory of a root-relative path is hidden
    pub fn is_hidden_relative(relative: &Path) -> bool {
        let Some(parent) = relative.parent() else {
            return false;
        };
        parent.components().any(|c| match c {
            Component::Normal(name) => is_hidden_name(name),
            _ => false,
        })
    }

    /// Image or generic ingestion, by file name
    pub fn classify(&self, path: &Path) -> IngestKind {
        if self.image.is_match(&path.to_string_lossy()) {
            IngestKind::Image
        } else {
            IngestKind::Generic
        }
    }

    /// Whether the name calls for JPEG interlacing
    pub fn is_jpeg(&self, path: &Path) -> bool {
        self.jpeg.is_match(&path.to_string_lossy())
    }

    /// File name used by the duplicate-by-name heuristic
    pub fn basename(path: &Path) -> Option<OsString> {
        path.file_name().map(|n| n.to_os_string())
    }
}
