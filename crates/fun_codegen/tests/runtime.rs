//! Generated programs executed against a stand-in for the `fun` runtime

use boa_engine::{Context, Source};
use fun_codegen::{emit_program, EmitOptions};
use fun_lexer::SourceMap;
use fun_parser::parse_source;
use fun_resolve::{resolve, ResolveOptions};

/// Hooks form a tree of text nodes; observers and event handlers are kept
/// so a test can mutate stored values and fire events afterwards.
const RUNTIME: &str = r#"
var document = { body: {} };
var fun = (function () {
    var hooks = {};
    var observers = [];
    var listeners = [];
    var store = { LOCAL: {}, GLOBAL: {} };
    var count = 0;

    function make(name, parent) {
        var node = { name: name, children: [], attrs: {} };
        hooks[name] = node;
        if (parent !== undefined) {
            hooks[parent].children.push(node);
        }
        return node;
    }

    function texts(node, out) {
        node.children.forEach(function (child) {
            if (child.text !== undefined) {
                out.push(child.text);
            } else {
                texts(child, out);
            }
        });
        return out;
    }

    return {
        setHook: function (name, element) { make(name); },
        name: function (readable) { count += 1; return readable + "_" + count; },
        hook: function (name, parent, options) { make(name, parent); return name; },
        getHook: function (name) { return hooks[name]; },
        attr: function (name, key, value) { hooks[name].attrs[key] = value; },
        style: function (name, style) { hooks[name].attrs.style = style; },
        text: function (name, value) { hooks[name].children.push({ text: String(value) }); },
        destroyHook: function (name) { hooks[name].children = []; },
        on: function (node, event, handler) { listeners.push({ node: node, event: event, handler: handler }); },
        observe: function (kind, name, callback) {
            observers.push({ kind: kind, name: name, callback: callback });
        },
        cachedValue: function (kind, name) { return store[kind][name]; },
        mutate: function (method, kind, name, args) {
            store[kind][name] = args[0];
            observers.forEach(function (o) {
                if (o.kind === kind && o.name === name) {
                    o.callback({ op: method, value: args[0] });
                }
            });
        },
        splitListMutation: function (render, mutation) {
            var items = mutation.value || [];
            for (var i = 0; i < items.length; i++) {
                render(items[i], mutation.op);
            }
        },
        reflectInput: function (name, kind, key, type) { hooks[name].attrs.value = store[kind][key]; },

        fire: function (event) {
            listeners.forEach(function (l) {
                if (l.event === event) {
                    l.handler({ type: event, target: l.node });
                }
            });
        },
        attrOf: function (name, key) { return hooks[name].attrs[key]; },
        rendered: function () { return texts(hooks.root, []).join(" "); }
    };
})();
"#;

fn build(source: &str) -> String {
    let mut sources = SourceMap::new();
    let file = sources.add("main.fun", source);
    let ast = parse_source(source, file).expect("test source should parse");
    let resolution = resolve(ast, ResolveOptions::default(), &mut sources).expect("test source should resolve");
    emit_program(&resolution, &EmitOptions::default()).expect("test source should emit")
}

/// Run the program, then `script`, and return what `script` evaluates to
fn run(source: &str, script: &str) -> String {
    let js = build(source);
    let mut context = Context::default();
    context.eval(Source::from_bytes(RUNTIME)).expect("stub runtime should load");
    if let Err(err) = context.eval(Source::from_bytes(&js)) {
        panic!("program failed: {}\n{}", err, js);
    }
    let value = context
        .eval(Source::from_bytes(script))
        .unwrap_or_else(|err| panic!("script failed: {}\n{}", err, js));
    value
        .to_string(&mut context)
        .expect("result should convert to a string")
        .to_std_string_escaped()
}

#[test]
fn test_markup_conditions_and_templates_run() {
    let source = "let row = template(label) { <li>\"row\"</li> }\n\
                  <button onClick=handler() { Local.count set: 5 }>\"+\"</button>\n\
                  if (Local.count >= 3) { \"many\" } else { \"few\" }\n\
                  <ul>row(\"a\")</ul>\n\
                  <input type=\"number\" data=Local.age/>\n\
                  <div style={ color: \"red\" } #{ title: \"t\" } class=Global.theme/>";

    assert_eq!(run(source, "fun.rendered()"), "+ few row");
    assert_eq!(run(source, "fun.fire('click'); fun.rendered()"), "+ many row");
    assert_eq!(
        run(source, "fun.mutate('SET', 'GLOBAL', 'theme', ['dark']); fun.attrOf('div_6', 'class')"),
        "dark"
    );
}

#[test]
fn test_loops_render_each_element() {
    let source = "let tasks = Local.tasks\n\
                  <ul>for (task in tasks) { <li>task.title</li> }</ul>";
    let script = "fun.mutate('SET', 'LOCAL', 'tasks', [[{ title: 'a' }, { title: 'b' }]]); fun.rendered()";
    assert_eq!(run(source, script), "a b");
}

#[test]
fn test_loop_element_named_op_keeps_its_value() {
    let source = "let ops = Local.ops\n<ul>for (op in ops) { <li>op</li> }</ul>";
    let script = "fun.mutate('SET', 'LOCAL', 'ops', [['x', 'y']]); fun.rendered()";
    assert_eq!(run(source, script), "x y");
}

#[test]
fn test_handler_in_loop_reads_its_element() {
    let source = "let tasks = Local.tasks\n\
                  <ul>for (task in tasks) { <li onClick=handler() { Local.picked set: task.id }>task.title</li> }</ul>\n\
                  <p>Local.picked</p>";
    let script = "fun.mutate('SET', 'LOCAL', 'tasks', [[{ id: 1, title: 'a' }, { id: 2, title: 'b' }]]);\n\
                  fun.fire('click');\n\
                  fun.rendered()";
    assert_eq!(run(source, script), "a b 2");
}

#[test]
fn test_template_in_loop_reads_its_element() {
    let source = "let tasks = Local.tasks\n\
                  <ul>for (task in tasks) { let row = template() { <b>task.title</b> }\nrow() }</ul>";
    let script = "fun.mutate('SET', 'LOCAL', 'tasks', [[{ title: 'a' }, { title: 'b' }]]); fun.rendered()";
    assert_eq!(run(source, script), "a b");
}
