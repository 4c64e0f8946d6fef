//! Element-side functions called on resolved handles.

/// `(clear) -> { editable, kind }`. Focuses the element and optionally empties it, firing the
/// same events a user edit would.
pub(crate) const FOCUS_FOR_INPUT: &str = r#"function (clear) {
  const el = this;
  const tag = el.tagName ? el.tagName.toLowerCase() : '';
  const textInput = tag === 'textarea' ||
    (tag === 'input' && !['checkbox', 'radio', 'button', 'submit', 'reset', 'file', 'image', 'hidden', 'range', 'color'].includes((el.type || 'text').toLowerCase()));
  const editable = el.isContentEditable || (textInput && !el.disabled && !el.readOnly);
  if (!editable) { return { editable: false, kind: tag }; }
  el.focus();
  if (clear) {
    if (el.isContentEditable) {
      el.textContent = '';
    } else {
      const proto = tag === 'textarea' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
      Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, '');
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
  }
  return { editable: true, kind: el.isContentEditable ? 'contenteditable' : tag };
}"#;

/// `(value, append)`. Assigns through the native setter so framework-controlled inputs notice.
pub(crate) const ASSIGN_VALUE: &str = r#"function (value, append) {
  const el = this;
  if (el.isContentEditable) {
    el.textContent = append ? el.textContent + value : value;
  } else {
    const proto = el.tagName.toLowerCase() === 'textarea' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const next = append ? el.value + value : value;
    Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, next);
  }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

pub(crate) const FOCUS: &str = "function () { this.focus(); return true; }";

pub(crate) const SCROLL_POSITION: &str = "({ x: window.scrollX, y: window.scrollY })";

pub(crate) const VIEWPORT_CENTER: &str = "({ x: window.innerWidth / 2, y: window.innerHeight / 2 })";
