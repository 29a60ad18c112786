//! An implementation of html5ever's sink trait, allowing us to parse HTML
//! into a Domreel document.

mod html_sink;

pub use html_sink::DocumentHtmlParser;
