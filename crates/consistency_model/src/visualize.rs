use {
    crate::LinearizationInfo,
    std::{
        fs::File,
        io::{self, BufWriter, Write},
        path::Path,
    },
};

const HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>History</title>
<style>
body { font-family: monospace; margin: 1em; }
.lane { position: relative; height: 26px; border-bottom: 1px solid #eee; }
.op { position: absolute; height: 20px; top: 3px; background: #cde; border: 1px solid #689;
      overflow: hidden; white-space: nowrap; font-size: 11px; }
.op.linearized { background: #aea; }
.op.stuck { background: #eaa; }
table { border-collapse: collapse; margin-top: 1em; }
td, th { border: 1px solid #ccc; padding: 2px 6px; text-align: left; }
</style>
</head>
<body>
<div id="timeline"></div>
<table id="steps"><tr><th>#</th><th>client</th><th>operation</th><th>state after</th></tr></table>
<script>
const info = "#;

const FOOTER: &str = r#";
const ops = info.operations;
const done = new Set(info.longest.map(s => s.index));
const lo = Math.min(...ops.map(o => o.call));
const hi = Math.max(...ops.map(o => o.ret));
const scale = t => ((t - lo) / Math.max(1, hi - lo)) * 95;
const lanes = new Map();
for (const [i, o] of ops.entries()) {
  if (!lanes.has(o.client_id)) {
    const lane = document.createElement("div");
    lane.className = "lane";
    lane.title = "client " + o.client_id;
    document.getElementById("timeline").appendChild(lane);
    lanes.set(o.client_id, lane);
  }
  const el = document.createElement("div");
  el.className = "op " + (done.has(i) ? "linearized" : "stuck");
  el.style.left = scale(o.call) + "%";
  el.style.width = Math.max(0.5, scale(o.ret) - scale(o.call)) + "%";
  el.title = o.description + " [" + o.call + ", " + o.ret + "]";
  el.textContent = o.description;
  lanes.get(o.client_id).appendChild(el);
}
for (const [n, s] of info.longest.entries()) {
  const row = document.createElement("tr");
  for (const text of [n, ops[s.index].client_id, ops[s.index].description, s.state]) {
    const td = document.createElement("td");
    td.textContent = text;
    row.appendChild(td);
  }
  document.getElementById("steps").appendChild(row);
}
</script>
</body>
</html>
"#;

/// Writes a self-contained HTML page that renders the operations on a per-client timeline
/// and lists the longest sequential ordering found.
pub fn visualize(info: &LinearizationInfo, mut out: impl Write) -> io::Result<()> {
    // `<` only occurs inside JSON strings, so escaping it keeps the data intact while no
    // description can close the script element.
    let json = serde_json::to_string(info)?.replace('<', "\\u003c");
    out.write_all(HEADER.as_bytes())?;
    out.write_all(json.as_bytes())?;
    out.write_all(FOOTER.as_bytes())?;
    out.flush()
}

pub fn visualize_path(info: &LinearizationInfo, path: impl AsRef<Path>) -> io::Result<()> {
    let file = File::create(path)?;
    visualize(info, BufWriter::new(file))
}
