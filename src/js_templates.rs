/// Default readiness predicate.
pub const DOCUMENT_COMPLETE: &str = "document.readyState === 'complete'";

/// True when the page exposes a seekable global animation timeline.
pub const TIMELINE_PROBE: &str = r#"(function(){try{const g=window.gsap;if(g&&g.globalTimeline&&typeof g.globalTimeline.seek==='function')return true;const tl=window.TimelineMax||window.TimelineLite;return !!(tl&&typeof tl.exportRoot==='function')}catch(e){return false}})()"#;

/// Seeks the page's global timeline to `position` seconds, or to its end when `None`.
pub fn seek_timeline(position: Option<f64>) -> String {
    let target = match position {
        Some(p) if p.is_finite() && p >= 0.0 => format!("{}", p),
        _ => "null".to_string(),
    };
    format!(
        r#"(function(){{const pos={};const g=window.gsap;let tl=null;if(g&&g.globalTimeline){{tl=g.globalTimeline}}else{{const T=window.TimelineMax||window.TimelineLite;if(T&&typeof T.exportRoot==='function')tl=T.exportRoot()}}if(!tl)return false;tl.seek(pos===null?tl.duration():pos,false);return true}})()"#,
        target
    )
}
