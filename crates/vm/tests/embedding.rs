//! End-to-end coverage of the embedding API (spec §6) against real
//! `.djuru` source, driving `djuru_vm::api::Vm` the way a host embedder
//! would rather than poking interpreter internals directly.

use std::cell::RefCell;
use std::rc::Rc;

use djuru_core::InterpretResult;
use djuru_vm::api::Vm;
use djuru_vm::config::Config;

fn captured_output() -> (Config, Rc<RefCell<String>>) {
    let out = Rc::new(RefCell::new(String::new()));
    let out_clone = Rc::clone(&out);
    let config = Config::new().with_write_fn(move |text| out_clone.borrow_mut().push_str(text));
    (config, out)
}

#[test]
fn arithmetic_and_string_interpolation_reach_the_host() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "nin x = 1 + 2\nA.seben_(x.toString)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "3");
}

#[test]
fn class_with_constructor_and_method_runs() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
kulu Point {\n\
  dilan new(x, y) {\n\
    _x = x\n\
    _y = y\n\
  }\n\
  sum { _x + _y }\n\
}\n\
nin p = Point.new(3, 4)\n\
A.seben_(p.sum.toString)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "7");
}

#[test]
fn subclass_inherits_and_overrides_methods() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
kulu Animal {\n\
  dilan new() {}\n\
  speak { \"...\" }\n\
}\n\
kulu Dog ye Animal {\n\
  dilan new() {}\n\
  speak { \"woof\" }\n\
}\n\
A.seben_(Dog.new().speak)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "woof");
}

#[test]
fn closures_capture_upvalues_across_calls() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
tii makeCounter() {\n\
  nin n = 0\n\
  segin tii () {\n\
    n = n + 1\n\
    segin n\n\
  }\n\
}\n\
nin counter = makeCounter()\n\
counter.call()\n\
counter.call()\n\
A.seben_(counter.call().toString)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "3");
}

#[test]
fn list_and_loop_accumulate_a_sum() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
nin items = [1, 2, 3, 4]\n\
nin total = 0\n\
seginka (item kono items) {\n\
  total = total + item\n\
}\n\
A.seben_(total.toString)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "10");
}

#[test]
fn fiber_runs_to_completion_via_call() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
nin fiber = Djuru.kura(tii () {\n\
  A.seben_(\"hi\")\n\
})\n\
fiber.weele()\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "hi");
}

#[test]
fn fiber_yield_and_resume_pass_values_through_mine() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
nin f = Djuru.kura(tii() {\n\
  Djuru.mine(1)\n\
  Djuru.mine(2)\n\
  segin 3\n\
})\n\
A.seben_(f.weele().toString)\n\
A.seben_(f.weele().toString)\n\
A.seben_(f.weele().toString)\n\
A.seben_(f.ok.toString)\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "123tien");
}

#[test]
fn fiber_transfer_never_returns_to_the_initiating_fiber() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
nin worker = Djuru.kura(tii (n) {\n\
  A.seben_(n.toString)\n\
})\n\
nin runner = Djuru.kura(tii () {\n\
  worker.alaTeme(42)\n\
  A.seben_(\"unreached\")\n\
})\n\
runner.weele()\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "42");
}

#[test]
fn fiber_aladie_catches_an_abort_from_a_child_fiber() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "\
nin boom = Djuru.kura(tii () {\n\
  afili \"boom\"\n\
})\n\
A.seben_(boom.aladie())\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);
    assert_eq!(out.borrow().as_str(), "boom");
}

#[test]
fn compile_error_reports_through_error_fn_and_skips_write_fn() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let config = Config::new().with_error_fn(move |kind, _module, _line, message| {
        seen_clone.borrow_mut().push((kind, message.to_string()));
    });
    let mut vm = Vm::new(config);
    assert_eq!(vm.interpret("main", "nin = \n"), InterpretResult::CompileError);
    assert!(!seen.borrow().is_empty());
}

#[test]
fn runtime_error_reports_a_stack_trace_innermost_first() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let config = Config::new().with_error_fn(move |kind, _module, _line, message| {
        seen_clone.borrow_mut().push((kind, message.to_string()));
    });
    let mut vm = Vm::new(config);
    let source = "\
tii boom() {\n\
  segin (1)(2)\n\
}\n\
boom()\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::RuntimeError);
    assert!(seen.borrow().len() >= 2);
}

#[test]
fn call_handle_invokes_a_module_variable_with_arguments() {
    let (config, out) = captured_output();
    let mut vm = Vm::new(config);
    let source = "tii add(a, b) {\n  segin a + b\n}\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);

    vm.ensure_slots(3);
    vm.get_variable("main", "add", 0);
    let closure = {
        let handle = vm.make_handle(0);
        handle
    };
    vm.set_slot_handle(0, closure);
    vm.set_slot_double(1, 10.0);
    vm.set_slot_double(2, 32.0);
    let call_handle = vm.make_call_handle("call(_,_)");
    assert_eq!(vm.call(&call_handle), InterpretResult::Success);
    assert_eq!(vm.get_slot_double(0), Some(42.0));
    let _ = out;
}

#[test]
fn extern_payload_round_trips_through_slots() {
    let mut vm = Vm::new(Config::new());
    let source = "dunan kulu Counter {}\n";
    assert_eq!(vm.interpret("main", source), InterpretResult::Success);

    vm.ensure_slots(2);
    vm.get_variable("main", "Counter", 1);
    vm.set_slot_new_extern::<u32>(0, 1, 99);
    assert_eq!(vm.get_slot_extern::<u32>(0), Some(&99));
}
