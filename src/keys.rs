//! Key-name translation for the browser backend.
//!
//! Models and upstream adapters speak a mix of X11 keysym names
//! (`Return`, `Page_Up`, `Meta_L`), loose aliases (`ctrl`, `esc`) and
//! DOM key values (`Enter`, `ArrowUp`). Everything is normalized to DOM
//! key values, which is what the CDP input domain consumes.

/// Modifier names as they come out of [`translate`].
pub const MODIFIERS: &[&str] = &["Meta", "Shift", "Alt"];

/// Separator understood by the backend as "press these together".
pub const CHORD_SEPARATOR: &str = "+";

/// Translate one key name. Matching is case-insensitive; unknown names pass
/// through untouched since callers may already hand us native key values.
///
/// Control maps to `Meta`, the command modifier.
pub fn translate(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let mapped = match lower.as_str() {
        "ctrl" | "control" | "control_l" | "control_r" => "Meta",
        "meta" | "meta_l" | "meta_r" | "cmd" | "command" | "super" | "super_l" | "super_r"
        | "win" | "windows" => "Meta",
        "shift" | "shift_l" | "shift_r" => "Shift",
        "alt" | "alt_l" | "alt_r" | "option" => "Alt",

        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "page_up" | "pageup" | "pgup" | "prior" => "PageUp",
        "page_down" | "pagedown" | "pgdn" | "next" => "PageDown",

        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "insert" | "ins" => "Insert",
        "tab" => "Tab",
        "escape" | "esc" => "Escape",
        "enter" | "return" | "kp_enter" => "Enter",
        "caps_lock" | "capslock" => "CapsLock",
        "space" => "Space",

        "slash" => "/",
        "backslash" => "\\",

        s => return function_key(s).unwrap_or_else(|| name.to_string()),
    };
    mapped.to_string()
}

fn function_key(lower: &str) -> Option<String> {
    let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
    (1..=12).contains(&n).then(|| format!("F{n}"))
}

pub fn is_modifier(translated: &str) -> bool {
    MODIFIERS.contains(&translated)
}

/// Turn a key list into the sequence of backend presses.
///
/// A list containing a modifier alongside other keys becomes one chord
/// (`["ctrl", "a"]` -> `["Meta+a"]`). Anything else is pressed key by key in
/// order, so `["a", "b"]` stays two separate keystrokes.
pub fn plan_key_presses<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let translated: Vec<String> = keys.iter().map(|k| translate(k.as_ref())).collect();
    let has_modifier = translated.iter().any(|k| is_modifier(k));
    if translated.len() > 1 && has_modifier {
        vec![translated.join(CHORD_SEPARATOR)]
    } else {
        translated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_aliases_agree_regardless_of_case() {
        assert_eq!(translate("CTRL"), translate("ctrl"));
        assert_eq!(translate("ctrl"), translate("Control"));
        assert_eq!(translate("ctrl"), "Meta");
    }

    #[test]
    fn x11_names_map_to_dom_values() {
        assert_eq!(translate("Return"), "Enter");
        assert_eq!(translate("BackSpace"), "Backspace");
        assert_eq!(translate("Page_Up"), "PageUp");
        assert_eq!(translate("Page_Down"), "PageDown");
        assert_eq!(translate("Up"), "ArrowUp");
        assert_eq!(translate("Meta_L"), "Meta");
        assert_eq!(translate("Alt_L"), "Alt");
        assert_eq!(translate("option"), "Alt");
        assert_eq!(translate("Caps_Lock"), "CapsLock");
        assert_eq!(translate("slash"), "/");
        assert_eq!(translate("backslash"), "\\");
        assert_eq!(translate("f5"), "F5");
        assert_eq!(translate("F12"), "F12");
    }

    #[test]
    fn canonical_names_are_fixed_points() {
        for name in [
            "Meta", "Shift", "Alt", "Enter", "Tab", "Escape", "Backspace", "Delete", "Insert",
            "Home", "End", "PageUp", "PageDown", "ArrowUp", "ArrowDown", "ArrowLeft",
            "ArrowRight", "CapsLock", "Space", "F1", "F12",
        ] {
            assert_eq!(translate(name), name);
            assert_eq!(translate(&translate(name)), translate(name));
        }
    }

    #[test]
    fn unknown_names_pass_through_unchanged() {
        assert_eq!(translate("a"), "a");
        assert_eq!(translate("F13"), "F13");
        assert_eq!(translate("MediaPlayPause"), "MediaPlayPause");
    }

    #[test]
    fn modifier_with_key_becomes_single_chord() {
        assert_eq!(plan_key_presses(&["ctrl", "a"]), vec!["Meta+a".to_string()]);
        assert_eq!(
            plan_key_presses(&["shift", "alt", "Tab"]),
            vec!["Shift+Alt+Tab".to_string()]
        );
    }

    #[test]
    fn plain_keys_are_pressed_one_by_one() {
        assert_eq!(plan_key_presses(&["a", "b"]), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(plan_key_presses(&["Return"]), vec!["Enter".to_string()]);
        assert_eq!(plan_key_presses(&["shift"]), vec!["Shift".to_string()]);
        assert!(plan_key_presses::<&str>(&[]).is_empty());
    }
}
