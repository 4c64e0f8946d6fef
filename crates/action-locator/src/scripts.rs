//! Page-side functions used by the resolver. Each is passed to `Runtime.callFunctionOn`.

/// Records every shadow root the page creates, open or closed, keyed by host element.
/// Installed before any page script runs; re-running it is harmless.
pub const SHADOW_PIERCER_SCRIPT: &str = r#"(() => {
  if (window.__pagewrightPiercer) { return; }
  const roots = new WeakMap();
  const attach = Element.prototype.attachShadow;
  Object.defineProperty(window, '__pagewrightPiercer', {
    value: Object.freeze({ get: (host) => roots.get(host) || null }),
    enumerable: false,
    configurable: false,
  });
  Element.prototype.attachShadow = function (init) {
    const root = attach.call(this, init);
    roots.set(this, root);
    return root;
  };
})();"#;

/// `(kind, query, pierce) -> Element[]` in document order, scoped to this frame's document.
pub(crate) const QUERY_ALL: &str = r#"function (kind, query, pierce) {
  const registry = window.__pagewrightPiercer;
  const shadowOf = (el) => {
    if (!pierce) { return null; }
    return el.shadowRoot || (registry ? registry.get(el) : null);
  };
  const ordered = [];
  const roots = [document];
  const visit = (el) => {
    ordered.push(el);
    const shadow = shadowOf(el);
    if (shadow) {
      roots.push(shadow);
      for (const child of shadow.children) { visit(child); }
    }
    for (const child of el.children) { visit(child); }
  };
  for (const child of document.children) { visit(child); }

  if (kind === 'css') {
    document.createDocumentFragment().querySelector(query);
    return ordered.filter((el) => el.matches(query));
  }

  if (kind === 'xpath') {
    const hits = new Set();
    for (const root of roots) {
      const result = document.evaluate(query, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      for (let i = 0; i < result.snapshotLength; i++) {
        const node = result.snapshotItem(i);
        if (node && node.nodeType === Node.ELEMENT_NODE) { hits.add(node); }
      }
    }
    return ordered.filter((el) => hits.has(el));
  }

  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'HEAD']);
  const texts = new Map();
  const textOf = (node) => {
    if (texts.has(node)) { return texts.get(node); }
    let out = '';
    const shadow = node.nodeType === Node.ELEMENT_NODE ? shadowOf(node) : null;
    if (shadow) { out += textOf(shadow); }
    for (const child of node.childNodes) {
      if (child.nodeType === Node.TEXT_NODE) {
        out += child.data;
      } else if (child.nodeType === Node.ELEMENT_NODE && !SKIP.has(child.tagName)) {
        out += textOf(child);
      }
    }
    texts.set(node, out);
    return out;
  };
  const normalize = (value) => value.replace(/\s+/g, ' ').trim().toLowerCase();
  const needle = normalize(query);
  return ordered.filter((el) => !SKIP.has(el.tagName) && normalize(textOf(el)).includes(needle));
}"#;

/// Called on a result array: composed-tree path of each element. Shadow boundaries are `0`,
/// child positions are 1-based, so an ancestor's path is a strict prefix of its descendants'.
pub(crate) const ELEMENT_PATHS: &str = r#"function () {
  return this.map((el) => {
    const path = [];
    let node = el;
    while (node && node.parentNode) {
      const parent = node.parentNode;
      path.push(Array.prototype.indexOf.call(parent.children || [], node) + 1);
      if (parent.nodeType === Node.DOCUMENT_FRAGMENT_NODE && parent.host) {
        path.push(0);
        node = parent.host;
      } else {
        node = parent;
      }
    }
    return path.reverse();
  });
}"#;

pub(crate) const ELEMENT_AT: &str = "function (index) { return this[index]; }";

pub(crate) const TAG_NAME: &str = "function () { return this.tagName; }";

/// Attached, non-empty box, and not hidden by display/visibility/opacity on any ancestor.
pub(crate) const IS_VISIBLE: &str = r#"function () {
  if (!this.isConnected) { return false; }
  const rect = this.getBoundingClientRect();
  if (rect.width === 0 || rect.height === 0) { return false; }
  const style = window.getComputedStyle(this);
  if (style.display === 'none' || style.visibility === 'hidden') { return false; }
  let node = this;
  while (node && node.nodeType === Node.ELEMENT_NODE) {
    const computed = window.getComputedStyle(node);
    if (computed.display === 'none' || parseFloat(computed.opacity) === 0) { return false; }
    const parent = node.parentNode;
    node = parent && parent.nodeType === Node.DOCUMENT_FRAGMENT_NODE ? parent.host : parent;
  }
  return true;
}"#;

pub(crate) const BOUNDING_RECT: &str = r#"function () {
  if (!this.isConnected) { return null; }
  const r = this.getBoundingClientRect();
  return { x: r.left, y: r.top, width: r.width, height: r.height };
}"#;

/// Absolute XPath, crossing shadow roots with a `/shadow-root` marker.
pub(crate) const XPATH_OF: &str = r#"function () {
  const segments = [];
  let node = this;
  while (node && node.nodeType === Node.ELEMENT_NODE) {
    const parent = node.parentNode;
    const tag = node.tagName.toLowerCase();
    let index = 1;
    let sibling = node.previousElementSibling;
    while (sibling) {
      if (sibling.tagName === node.tagName) { index++; }
      sibling = sibling.previousElementSibling;
    }
    segments.unshift(`${tag}[${index}]`);
    if (parent && parent.nodeType === Node.DOCUMENT_FRAGMENT_NODE && parent.host) {
      segments.unshift('shadow-root');
      node = parent.host;
    } else {
      node = parent;
    }
  }
  return '/' + segments.join('/');
}"#;

pub(crate) const INNER_TEXT: &str =
    "function () { return (this.innerText || this.textContent || '').trim(); }";

pub(crate) const LENGTH: &str = "function () { return this.length; }";
