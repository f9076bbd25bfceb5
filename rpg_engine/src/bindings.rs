use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Lua, Variadic};
use rpg_events::Flags;

use crate::world::EventLog;

/// Event names scripts asked to run; drained by the runtime after each script tick.
pub type CallQueue = Rc<RefCell<Vec<String>>>;

/// Registers the engine functions scripts may call.
pub fn install(lua: &Lua, flags: Rc<RefCell<Flags>>, log: EventLog, calls: CallQueue) -> mlua::Result<()> {
    let globals = lua.globals();

    let has = flags.clone();
    globals.set(
        "has_flag",
        lua.create_function(move |_, name: String| Ok(has.borrow().has(&name)))?,
    )?;

    let set = flags.clone();
    let set_log = log.clone();
    globals.set(
        "set_flag",
        lua.create_function(move |_, name: String| {
            let changed = set.borrow_mut().set(&name);
            if changed {
                set_log.push(format!("flag.set {name}"));
            }
            Ok(changed)
        })?,
    )?;

    let unset = flags;
    let unset_log = log.clone();
    globals.set(
        "unset_flag",
        lua.create_function(move |_, name: String| {
            let changed = unset.borrow_mut().unset(&name);
            if changed {
                unset_log.push(format!("flag.unset {name}"));
            }
            Ok(changed)
        })?,
    )?;

    globals.set(
        "call_event",
        lua.create_function(move |_, name: String| {
            calls.borrow_mut().push(name);
            Ok(())
        })?,
    )?;

    globals.set(
        "log_event",
        lua.create_function(move |_, parts: Variadic<String>| {
            log.push(parts.join(" "));
            Ok(())
        })?,
    )?;

    Ok(())
}
