//! Integration tests for the proxy bridge against an in-process sandbox.

use std::sync::Arc;

use anyhow::Result;

use cordrpc::Frame;
use cordrpc::Operation;
use cordrpc::Payload;
use cordrpc::ReplyFrame;
use cordrpc::Request;
use cordrpc::RequestFrame;
use cordrpc::Target;

use marionette::args;
use marionette::sandbox;
use marionette::sandbox::Sandbox;
use marionette::CaptureOptions;
use marionette::ChannelTransport;
use marionette::Context;
use marionette::Error;
use marionette::Failure;
use marionette::Proxy;
use marionette::ProxyState;
use marionette::RootId;
use marionette::Transport;
use marionette::Value;

async fn context_2d(canvas: &Proxy) -> Result<Proxy> {
    Ok(canvas.call("getContext", args!["2d"]).await?.into_proxy()?)
}

fn failure(result: marionette::Result<impl std::fmt::Debug>) -> Failure {
    match result {
        Err(Error::Remote(f)) => f,
        other => panic!("expected a remote failure, got {:?}", other),
    }
}

// --- Round trips ---

#[tokio::test]
async fn test_set_then_get_returns_value() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(100, 100).await?;
    let g = context_2d(&canvas).await?;

    g.set("lineWidth", 7).await?;
    assert_eq!(g.get("lineWidth").value().await?, Value::Number(7.0));

    canvas.set("title", "house").await?;
    assert_eq!(canvas.get("title").value().await?, Value::String("house".into()));

    g.set("textAlign", "center").await?;
    assert_eq!(g.get("textAlign").value().await?, Value::String("center".into()));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_compound_results_become_bound_proxies() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(120, 80).await?;
    assert_eq!(canvas.state(), ProxyState::UnboundPath);

    let g = context_2d(&canvas).await?;
    assert_eq!(g.state(), ProxyState::BoundReference);
    assert_eq!(g.class(), Some("CanvasRenderingContext2D"));

    // Primitive reads through the bound proxy match direct reads.
    let via_context = g.get("canvas").get("width").value().await?;
    let direct = canvas.get("width").value().await?;
    assert_eq!(via_context, direct);
    assert_eq!(direct, Value::Number(120.0));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_back_to_back_compound_results_get_distinct_ids() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    let first = g.call("createLinearGradient", args![0, 0, 10, 0]);
    let second = g.call("createLinearGradient", args![0, 0, 10, 0]);
    let (first, second) = (first.await?.into_proxy()?, second.await?.into_proxy()?);

    assert!(first.ref_id().is_some());
    assert_ne!(first.ref_id(), second.ref_id());
    assert_eq!(first.class(), Some("CanvasGradient"));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_bound_arguments_keep_identity() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    let list = g.call("getLineDash", args![]).await?.into_proxy()?;
    let kept = g.call("createRadialGradient", args![5, 5, 0, 5, 5, 5]).await?.into_proxy()?;
    let other = g.call("createRadialGradient", args![5, 5, 0, 5, 5, 5]).await?.into_proxy()?;

    assert_eq!(list.call("push", args![&kept]).await?.into_value()?, Value::Number(1.0));
    assert_eq!(list.call("includes", args![&kept]).await?.into_value()?, Value::Bool(true));
    assert_eq!(list.call("indexOf", args![&kept]).await?.into_value()?, Value::Number(0.0));
    assert_eq!(list.call("includes", args![&other]).await?.into_value()?, Value::Bool(false));
    assert_eq!(list.call("indexOf", args![&other]).await?.into_value()?, Value::Number(-1.0));

    // Assigned values keep identity too.
    g.set("fillStyle", &kept).await?;
    let back = g.get("fillStyle").fetch().await?.into_proxy()?;
    assert_eq!(list.call("includes", args![&back]).await?.into_value()?, Value::Bool(true));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_unbound_proxies_cannot_be_arguments() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    let result = g.call("drawImage", args![&canvas, 0, 0]).await;
    assert!(matches!(result, Err(Error::Unmarshalable(_))));

    // Fetching the path binds it.
    let bound = g.get("canvas").fetch().await?.into_proxy()?;
    assert_eq!(bound.class(), Some("HTMLCanvasElement"));
    g.call("drawImage", args![&bound, 0, 0]).await?;

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_unawaited_operations_run_in_issue_order() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(4, 4).await?;
    let g = context_2d(&canvas).await?;

    drop(g.set("fillStyle", "#ff0000"));
    drop(g.call("fillRect", args![0, 0, 4, 4]));
    drop(g.set("fillStyle", "#0000ff"));
    let image = g.call("getImageData", args![1, 1, 1, 1]).await?.into_proxy()?;

    let data = image.get("data");
    assert_eq!(data.get(0).value().await?, Value::Number(255.0));
    assert_eq!(data.get(2).value().await?, Value::Number(0.0));
    assert_eq!(g.get("fillStyle").value().await?, Value::String("#0000ff".into()));

    ctx.close().await?;
    Ok(())
}

// --- Failures ---

#[tokio::test]
async fn test_remote_errors_pass_through() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    let f = failure(g.call("arc", args![0, 0, -1, 0, 1]).await);
    assert!(matches!(f, Failure::Thrown { ref name, .. } if name == "IndexSizeError"));

    let f = failure(g.call("fillRect", args![1]).await);
    assert_eq!(
        f,
        Failure::thrown(
            "TypeError",
            "Failed to execute 'fillRect' on 'CanvasRenderingContext2D': 4 arguments required, but only 1 present."
        )
    );

    let f = failure(canvas.get("nothing").get("here").value().await);
    assert_eq!(
        f,
        Failure::thrown("TypeError", "Cannot read properties of undefined (reading 'here')")
    );

    // The root is still usable after a failure.
    assert_eq!(canvas.get("height").value().await?, Value::Number(10.0));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_release_evicts_registry() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    ctx.release(&canvas).await?;

    let result = g.get("lineWidth").value().await;
    assert!(result.as_ref().is_err_and(Error::is_registry_miss), "{:?}", result);
    let result = canvas.get("width").value().await;
    assert!(result.as_ref().is_err_and(Error::is_registry_miss), "{:?}", result);
    let result = context_2d(&canvas).await;
    assert!(result.is_err());

    // Releasing twice is harmless and the surface can still be captured.
    ctx.release(&canvas).await?;
    let png = ctx.capture(&canvas, CaptureOptions::default()).await?.to_png()?;
    assert!(!png.is_empty());

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_array_growth_is_bounded() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;
    let dash = g.call("getLineDash", args![]).await?.into_proxy()?;

    let f = failure(dash.set(4_000_000_000u32, 1).await);
    assert_eq!(f, Failure::thrown("RangeError", "Invalid array length"));
    let f = failure(dash.set("length", 4_000_000_000u32).await);
    assert_eq!(f, Failure::thrown("RangeError", "Invalid array length"));

    assert_eq!(dash.get("length").value().await?, Value::Number(0.0));
    dash.set(2, 7).await?;
    assert_eq!(dash.get("length").value().await?, Value::Number(3.0));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_root_creation_failures() -> Result<()> {
    let ctx = Context::builder().max_surface_dim(256).surface("tiny", 0, 5).open();

    assert!(matches!(failure(ctx.create_root(0, 10).await), Failure::Init(_)));
    assert!(matches!(failure(ctx.create_root(257, 10).await), Failure::Init(_)));
    assert!(matches!(failure(ctx.attach_root("missing").await), Failure::Init(_)));
    assert!(matches!(failure(ctx.attach_root("tiny").await), Failure::Init(_)));
    assert!(ctx.create_root(256, 256).await.is_ok());

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_close_invalidates_proxies() -> Result<()> {
    let ctx = Context::open();
    let canvas = ctx.create_root(10, 10).await?;
    let g = context_2d(&canvas).await?;

    ctx.close().await?;

    assert!(matches!(g.get("lineWidth").value().await, Err(Error::Closed)));
    assert!(matches!(canvas.set("x", 1).await, Err(Error::Closed)));
    Ok(())
}

#[tokio::test]
async fn test_proxies_are_tied_to_their_context() -> Result<()> {
    let a = Context::open();
    let b = Context::open();
    let canvas = a.create_root(10, 10).await?;

    assert!(matches!(b.release(&canvas).await, Err(Error::Unmarshalable(_))));

    a.close().await?;
    b.close().await?;
    Ok(())
}

// --- Raw wire ---

#[tokio::test]
async fn test_connect_to_sandbox_served_elsewhere() -> Result<()> {
    let (local, remote) = ChannelTransport::pair();
    let host = tokio::spawn(Sandbox::new(sandbox::Config::default()).serve(Arc::new(remote)));

    let ctx = Context::connect("remote-controller", Box::new(local));
    let canvas = ctx.create_root(32, 16).await?;
    assert_eq!(canvas.get("height").value().await?, Value::Number(16.0));

    ctx.close().await?;
    host.await?;
    Ok(())
}

#[tokio::test]
async fn test_sandbox_answers_malformed_and_misrouted_requests() -> Result<()> {
    let (local, remote) = ChannelTransport::pair();
    let host = tokio::spawn(Sandbox::new(sandbox::Config::default()).serve(Arc::new(remote)));

    // A request whose body does not decode still gets an answer for its seq.
    let mut enc = cordpack::Encoder::new();
    enc.variant_begin("Request")?;
    enc.map_begin()?;
    enc.variant_begin("seq")?;
    enc.u64(41)?;
    enc.variant_end()?;
    enc.variant_begin("body")?;
    enc.tag("Teleport")?;
    enc.variant_end()?;
    enc.map_end()?;
    enc.variant_end()?;
    local.send(&enc.into_bytes()?).await?;

    let reply = next_reply(&local).await?;
    assert_eq!(reply.seq, 41);
    assert!(matches!(reply.status, Err(Failure::Protocol(_))));

    // Requests for a root that was never created.
    let request = Request::Invoke {
        target: Target::Root(RootId(99)),
        op: Operation::get(vec!["width".into()]),
    };
    local.send(&RequestFrame::new(42, request).to_bytes()?).await?;
    let reply = next_reply(&local).await?;
    assert_eq!(reply.seq, 42);
    assert_eq!(reply.status, Err(Failure::RegistryMiss { root: RootId(99), id: None }));

    local.send(&RequestFrame::new(43, Request::Shutdown).to_bytes()?).await?;
    let reply = next_reply(&local).await?;
    assert_eq!(reply.status, Ok(Payload::Unit));
    host.await?;
    Ok(())
}

#[tokio::test]
async fn test_references_do_not_cross_roots_on_the_wire() -> Result<()> {
    let (local, remote) = ChannelTransport::pair();
    let host = tokio::spawn(Sandbox::new(sandbox::Config::default()).serve(Arc::new(remote)));

    let Ok(Payload::Root(a)) = exchange(&local, 1, Request::CreateRoot { width: 8, height: 8 }).await?
    else {
        anyhow::bail!("root a was not created");
    };
    let Ok(Payload::Root(b)) = exchange(&local, 2, Request::CreateRoot { width: 8, height: 8 }).await?
    else {
        anyhow::bail!("root b was not created");
    };

    let get_context = Request::Invoke {
        target: Target::Root(a),
        op: Operation::apply(vec!["getContext".into()], vec![Value::from("2d")]),
    };
    let Ok(Payload::Value(Value::Ref(id))) = exchange(&local, 3, get_context).await? else {
        anyhow::bail!("getContext did not return a reference");
    };
    let miss = Err(Failure::RegistryMiss { root: b, id: Some(id.clone()) });

    // Addressed to the other root.
    let request = Request::Invoke {
        target: Target::Reference { root: b, id: id.clone() },
        op: Operation::get(vec!["lineWidth".into()]),
    };
    assert_eq!(exchange(&local, 4, request).await?, miss);

    // Passed as an argument on the other root.
    let request = Request::Invoke {
        target: Target::Root(b),
        op: Operation::apply(vec!["toDataURL".into()], vec![Value::Ref(id.clone())]),
    };
    assert_eq!(exchange(&local, 5, request).await?, miss);

    // Assigned on the other root.
    let request = Request::Invoke {
        target: Target::Root(b),
        op: Operation::set(vec!["peer".into()], Value::List(vec![Value::Ref(id.clone())])),
    };
    assert_eq!(exchange(&local, 6, request).await?, miss);

    // Still valid where it was minted.
    let request = Request::Invoke {
        target: Target::Reference { root: a, id },
        op: Operation::get(vec!["lineWidth".into()]),
    };
    assert_eq!(exchange(&local, 7, request).await?, Ok(Payload::Value(Value::Number(1.0))));

    assert_eq!(exchange(&local, 8, Request::Shutdown).await?, Ok(Payload::Unit));
    host.await?;
    Ok(())
}

async fn exchange(
    transport: &ChannelTransport,
    seq: u64,
    request: Request,
) -> Result<std::result::Result<Payload, Failure>> {
    transport.send(&RequestFrame::new(seq, request).to_bytes()?).await?;
    let reply = next_reply(transport).await?;
    assert_eq!(reply.seq, seq);
    Ok(reply.status)
}

async fn next_reply(transport: &ChannelTransport) -> Result<ReplyFrame> {
    let bytes = transport.recv().await?.ok_or_else(|| anyhow::anyhow!("sandbox hung up"))?;
    match Frame::decode(&bytes)? {
        Frame::Reply(reply) => Ok(reply),
        Frame::Request(_) => anyhow::bail!("sandbox sent a request"),
    }
}
